//! Song values and queue ordering
//!
//! A song is a mapping from tag name to the ordered values MPD reported for
//! it. Multi-valued tags are universal so serialization stays uniform; the
//! mandatory `file` tag identifies a song within the library. The map is a
//! `BTreeMap` so serialized snapshots are byte-stable and cache comparisons
//! are deterministic.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Tag name to ordered values, as reported by the daemon
pub type Song = BTreeMap<String, Vec<String>>;

/// One filter step: `(tag name, expected value)`. An entry with a missing
/// side matches every song.
pub type Filter = (Option<String>, Option<String>);

/// First value of a tag, or the empty string when absent.
pub fn first<'a>(song: &'a Song, key: &str) -> &'a str {
    song.get(key)
        .and_then(|v| v.first())
        .map(String::as_str)
        .unwrap_or("")
}

/// Derive tags the daemon does not always provide. `AlbumArtist` falls back
/// to `Artist` so sorting and filtering behave on sparsely tagged files.
pub fn add_tags(mut song: Song) -> Song {
    if !song.contains_key("AlbumArtist") {
        if let Some(artist) = song.get("Artist").cloned() {
            song.insert("AlbumArtist".to_string(), artist);
        }
    }
    song
}

/// Queue equality under identity projection: same length and the same
/// `file` value at every position.
pub fn sort_equal(a: &[Song], b: &[Song]) -> bool {
    a.len() == b.len()
        && a.iter()
            .zip(b.iter())
            .all(|(x, y)| first(x, "file") == first(y, "file"))
}

fn compare_by_keys(a: &Song, b: &Song, keys: &[String]) -> Ordering {
    for key in keys {
        match first(a, key).cmp(first(b, key)) {
            Ordering::Equal => continue,
            other => return other,
        }
    }
    Ordering::Equal
}

fn matches(song: &Song, filter: &Filter) -> bool {
    match filter {
        (Some(tag), Some(value)) => song
            .get(tag.as_str())
            .is_some_and(|values| values.iter().any(|v| v == value)),
        _ => true,
    }
}

fn matches_all(song: &Song, filters: &[Filter]) -> bool {
    filters.iter().all(|f| matches(song, f))
}

/// Stable sort of the library by `keys`, then weak filtering: filters are
/// dropped from the tail until the song at `current` stays in the filtered
/// subsequence or only `must` filters remain.
///
/// Returns the filtered ordering, the filters actually applied, and the new
/// position of the current song (0 when it did not survive filtering).
pub fn weak_filter_sort(
    library: &[Song],
    keys: &[String],
    filters: &[Filter],
    must: usize,
    current: usize,
) -> (Vec<Song>, Vec<Filter>, usize) {
    let mut sorted: Vec<Song> = library.to_vec();
    sorted.sort_by(|a, b| compare_by_keys(a, b, keys));

    let target = library.get(current).map(|song| first(song, "file"));
    let mut kept = filters.len();
    loop {
        let subset: Vec<Song> = sorted
            .iter()
            .filter(|song| matches_all(song, &filters[..kept]))
            .cloned()
            .collect();
        let pos = target.and_then(|file| subset.iter().position(|song| first(song, "file") == file));
        match pos {
            Some(pos) => return (subset, filters[..kept].to_vec(), pos),
            None if kept > must => kept -= 1,
            None => return (subset, filters[..kept].to_vec(), 0),
        }
    }
}
