pub mod normalize;
pub mod numeric;
pub mod provider;
pub mod types;
