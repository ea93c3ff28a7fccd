/// Max lots per tenant.
pub const MAX_LOTS_PER_TENANT: usize = 1_000;

/// Max spots in a single lot.
pub const MAX_SPOTS_PER_LOT: usize = 10_000;

/// Max queued reservations on a single spot.
pub const MAX_RESERVATIONS_PER_SPOT: usize = 4_096;

/// Max lot name length in bytes.
pub const MAX_LOT_NAME_LEN: usize = 128;

/// Max tenants (databases) per server.
pub const MAX_TENANTS: usize = 256;

/// Max tenant name length in bytes.
pub const MAX_TENANT_NAME_LEN: usize = 64;

/// Earliest year accepted in an interval.
pub const MIN_VALID_YEAR: i32 = 2000;

/// Latest year accepted in an interval.
pub const MAX_VALID_YEAR: i32 = 9999;
