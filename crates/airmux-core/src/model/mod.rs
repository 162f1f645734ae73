// ── Arbiter domain model ──

mod iface;
mod profile;

pub use iface::IfaceHandle;
pub use profile::StaticChipProfile;
