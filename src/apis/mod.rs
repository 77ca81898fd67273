// Registry API clients
pub mod ctgov;
