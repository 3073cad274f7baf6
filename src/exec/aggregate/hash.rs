//! Group-key hashing.

use std::hash::Hasher;

use xxhash_rust::xxh64::Xxh64;

use crate::query::value::{normalized_float_bits, Value};

/// Hash of a key tuple with no columns (global aggregation).
pub const EMPTY_KEY_HASH: u64 = 0;

/// Hashes one key value. Values that are `group_eq` hash identically.
pub fn hash_value(value: &Value) -> u64 {
    let mut hasher = Xxh64::new(0);
    write_value(value, &mut hasher);
    hasher.finish()
}

/// Order-sensitive combination of two hashes.
pub fn combine_hash(acc: u64, next: u64) -> u64 {
    acc.wrapping_mul(0xbf58_476d_1ce4_e5b9) ^ next
}

/// Combined hash of a key tuple in column order.
pub fn hash_key_tuple<'a, I>(keys: I) -> u64
where
    I: IntoIterator<Item = &'a Value>,
{
    let mut hashes = keys.into_iter().map(hash_value);
    match hashes.next() {
        Some(first) => hashes.fold(first, combine_hash),
        None => EMPTY_KEY_HASH,
    }
}

fn write_value(value: &Value, hasher: &mut Xxh64) {
    match value {
        Value::Null => hasher.write_u8(0),
        Value::Bool(v) => {
            hasher.write_u8(1);
            hasher.write_u8(*v as u8);
        }
        Value::Int(v) => {
            hasher.write_u8(2);
            hasher.write_i64(*v);
        }
        Value::Float(v) => {
            hasher.write_u8(3);
            hasher.write_u64(normalized_float_bits(*v));
        }
        Value::String(s) => {
            hasher.write_u8(4);
            hasher.write(s.as_bytes());
        }
        Value::Bytes(bytes) => {
            hasher.write_u8(5);
            hasher.write_u64(bytes.len() as u64);
            hasher.write(bytes);
        }
        Value::DateTime(ts) => {
            hasher.write_u8(6);
            hasher.write(&ts.to_le_bytes());
        }
    }
}
