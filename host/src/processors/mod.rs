//! One processor per API operation: a plain struct holding its dependencies
//! and parameters, with an `enact` method doing the work. The REST layer
//! only constructs processors and translates their results.

pub mod login;
pub mod node;
pub mod queue;
pub mod task;
