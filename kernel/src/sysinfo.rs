pub const HALCYON_VERSION: &str = env!("CARGO_PKG_VERSION");
