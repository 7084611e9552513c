pub mod crawler;
pub mod idor;
pub mod injection;
