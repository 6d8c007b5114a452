use hashbrown::HashMap;

use crate::types::ContactId;

/// Non-unique index; each bucket holds ids in ascending (insertion) order.
pub type VecIndex<K> = HashMap<K, Vec<ContactId>>;
/// Unique index mapping a key to its single owner.
pub type UniqueIndex<K> = HashMap<K, ContactId>;

/// Adds `id` under `key`, keeping the bucket sorted and free of repeats.
pub fn vec_index_insert(index: &mut VecIndex<String>, key: &str, id: ContactId) {
    let bucket = index.entry_ref(key).or_default();
    match bucket.binary_search(&id) {
        Ok(_) => {}
        Err(pos) => bucket.insert(pos, id),
    }
}

/// Removes `id` from `key`'s bucket and drops the bucket once empty.
pub fn vec_index_remove(index: &mut VecIndex<String>, key: &str, id: ContactId) {
    let Some(bucket) = index.get_mut(key) else {
        return;
    };
    if let Ok(pos) = bucket.binary_search(&id) {
        bucket.remove(pos);
    }
    if bucket.is_empty() {
        index.remove(key);
    }
}
