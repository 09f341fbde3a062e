pub mod auctions;
pub mod character;
pub mod locations;
pub mod skills;

pub use locations::{Street, Visit};
pub use skills::{Blockers, LearnQueue, Requirement, SkillCycle, SkillRecord, TargetChain};
