//! Instance names and migration ports.
//!
//! Both are drawn from a non-cryptographic generator and may collide. The
//! API server rejects duplicate pod names; a port collision between two
//! concurrent migrations on one node is accepted.

use rand::Rng;
use vmkit_api::labels::NAME_DELIMITER;

/// Lowest migration port. Ports are drawn from `[MIGRATE_PORT_MIN, 65536)`.
pub const MIGRATE_PORT_MIN: u16 = 32768;

/// `<vm>-<8 hex digits>`.
pub fn instance_name(vm_name: &str) -> String {
    instance_name_from(&mut rand::rng(), vm_name)
}

pub fn instance_name_from<R: Rng + ?Sized>(rng: &mut R, vm_name: &str) -> String {
    format!("{vm_name}{NAME_DELIMITER}{:08x}", rng.random::<u32>())
}

pub fn migrate_port() -> u16 {
    migrate_port_from(&mut rand::rng())
}

pub fn migrate_port_from<R: Rng + ?Sized>(rng: &mut R) -> u16 {
    rng.random_range(MIGRATE_PORT_MIN..=u16::MAX)
}
