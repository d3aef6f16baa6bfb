pub mod asset_owner;
pub mod asset_ref;
