/// Offset basis for the 32-bit FNV-1a digest.
pub const FNV1A_OFFSET32: u32 = 216_613_626;
/// Prime for the 32-bit FNV-1a digest.
pub const FNV1A_PRIME32: u32 = 16_777_619;

/// Offset basis for the 64-bit FNV-1a digest.
pub const FNV1A_OFFSET64: u64 = 14_695_981_039_346_656_037;
/// Prime for the 64-bit FNV-1a digest.
pub const FNV1A_PRIME64: u64 = 1_099_511_628_211;

/// 32-bit Fowler-Noll-Vo alternate-order hash.
pub fn fnv1a32(key: &[u8]) -> u32 {
    let mut hash = FNV1A_OFFSET32;
    for b in key {
        hash = (hash ^ u32::from(*b)).wrapping_mul(FNV1A_PRIME32);
    }
    hash
}

/// 64-bit Fowler-Noll-Vo alternate-order hash.
pub fn fnv1a64(key: &[u8]) -> u64 {
    let mut hash = FNV1A_OFFSET64;
    for b in key {
        hash = (hash ^ u64::from(*b)).wrapping_mul(FNV1A_PRIME64);
    }
    hash
}

/// Jump consistent hash (Lamping & Veach): maps `key` to a bucket in
/// `[0, num_buckets)` with O(1) memory and minimal key movement when
/// `num_buckets` grows.
///
/// `num_buckets` must be >= 1.
pub fn jump_hash(mut key: u64, num_buckets: i32) -> i32 {
    let mut b: i64 = -1;
    let mut j: i64 = 0;
    while j < i64::from(num_buckets) {
        b = j;
        key = key.wrapping_mul(2_862_933_555_777_941_757).wrapping_add(1);
        j = ((b.wrapping_add(1) as f64) * ((1u64 << 31) as f64 / (((key >> 33) + 1) as f64))) as i64;
    }
    b as i32
}
