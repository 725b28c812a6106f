use xxhash_rust::xxh64::xxh64;

/// Separator between the title and each artist name in the hashed key.
const KEY_DELIMITER: &str = "|";

/// Derive the content-addressed id of a track or project.
///
/// Artist names are sorted byte-wise (case-sensitive) so the id does not
/// depend on credit order, then joined after the title and hashed with
/// unseeded XXH64. The caller's slice is left untouched.
pub fn derive_id<S: AsRef<str>>(title: &str, artist_names: &[S]) -> u64 {
    let mut names: Vec<&str> = artist_names.iter().map(|n| n.as_ref()).collect();
    names.sort_unstable();

    let mut key = String::with_capacity(
        title.len() + names.iter().map(|n| n.len() + KEY_DELIMITER.len()).sum::<usize>(),
    );
    key.push_str(title);
    for name in names {
        key.push_str(KEY_DELIMITER);
        key.push_str(name);
    }

    xxh64(key.as_bytes(), 0)
}
