pub mod member;
pub mod events;

pub use member::{Member, MemberId};
pub use events::{ClusterEvent, LifecycleState};
