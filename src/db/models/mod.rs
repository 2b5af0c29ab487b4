pub mod group;
pub mod member;
