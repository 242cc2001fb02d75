pub mod check;
pub mod invite;
pub mod policy;
pub mod role;
pub mod tenant;
