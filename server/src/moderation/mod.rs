pub mod ban;
