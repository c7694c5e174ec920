pub mod company;
pub mod statement;
