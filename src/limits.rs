//! Hard caps that keep a single tenant from exhausting memory or the WAL.

pub const MAX_TENANTS: usize = 1024;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_BUSINESSES_PER_TENANT: usize = 10_000;
pub const MAX_BREAKS_PER_BUSINESS: usize = 256;
pub const MAX_HOLIDAYS_PER_BUSINESS: usize = 4_096;
pub const MAX_BLOCKED_SLOTS_PER_BUSINESS: usize = 16_384;
pub const MAX_BOOKINGS_PER_DAY: usize = 4_096;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_LABEL_LEN: usize = 512;

pub const MIN_SLOT_DURATION: u16 = 1;
pub const MAX_SLOT_DURATION: u16 = 720;

/// Rows accepted in a single multi-row INSERT.
pub const MAX_INSERT_ROWS: usize = 64;
