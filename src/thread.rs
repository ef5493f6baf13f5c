//! Thread reconstruction from flat `e`-tag data.
//!
//! NIP-10 defines two conventions for encoding reply relationships. Marked
//! tags carry an explicit marker as the tag's 4th element; the deprecated
//! positional convention gives meaning to tag order instead (first = thread
//! root, last = direct parent, interior = mentions). A note picks its
//! convention by whether any of its own `e` tags carries a marker.

use std::collections::{HashMap, HashSet};

use crate::event::{Event, Tag};

/// Position of a note relative to a referenced event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Marker {
    Root,
    Reply,
    Mention,
}

impl Marker {
    /// Marker string as it appears in a tag's 4th element.
    pub fn as_str(self) -> &'static str {
        match self {
            Marker::Root => "root",
            Marker::Reply => "reply",
            Marker::Mention => "mention",
        }
    }
}

fn e_tags(note: &Event) -> Vec<&Tag> {
    note.e_tags().collect()
}

/// Whether `note` references `parent_id` under `marker`.
///
/// In marked mode a lone root-marked tag does not count as a root-level
/// reply; that shape is reserved for mention-style references.
pub fn references(note: &Event, parent_id: &str, marker: Marker) -> bool {
    let e_tags = e_tags(note);
    if e_tags.is_empty() {
        return false;
    }
    let marked = e_tags.iter().any(|tag| tag.0.len() == 4);
    if marked {
        let hit = e_tags
            .iter()
            .any(|tag| tag.arg(3) == Some(marker.as_str()) && tag.arg(1) == Some(parent_id));
        hit && !(marker == Marker::Root && e_tags.len() == 1)
    } else {
        match marker {
            Marker::Root => e_tags.len() == 1 && e_tags[0].arg(1) == Some(parent_id),
            Marker::Reply => {
                e_tags.len() > 1
                    && e_tags.last().and_then(|tag| tag.arg(1)) == Some(parent_id)
            }
            Marker::Mention => {
                e_tags.len() > 2
                    && e_tags[1..e_tags.len() - 1]
                        .iter()
                        .any(|tag| tag.arg(1) == Some(parent_id))
            }
        }
    }
}

fn sort_newest_first(notes: &mut Vec<&Event>) {
    // Tie-break on id so output is stable across map iteration orders.
    notes.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
}

/// Notes that reference no other event, newest first.
pub fn root_notes(notes: &HashMap<String, Event>) -> Vec<&Event> {
    let mut roots: Vec<&Event> = notes
        .values()
        .filter(|note| note.e_tags().next().is_none())
        .collect();
    sort_newest_first(&mut roots);
    roots
}

/// Notes replying to / mentioning `parent_id` under `marker`, newest first.
pub fn replies_of<'a>(
    notes: &'a HashMap<String, Event>,
    parent_id: &str,
    marker: Marker,
) -> Vec<&'a Event> {
    let mut replies: Vec<&Event> = notes
        .values()
        .filter(|note| references(note, parent_id, marker))
        .collect();
    sort_newest_first(&mut replies);
    replies
}

/// A note and its transitive replies.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadNode<'a> {
    pub note: &'a Event,
    pub replies: Vec<ThreadNode<'a>>,
}

/// Build the reply tree under `root_id`. Direct replies to the root are found
/// under the `root` marker, deeper levels under `reply`. Tag data comes from
/// untrusted relays, so a visited set bounds the traversal even if tags form
/// a cycle.
pub fn thread<'a>(notes: &'a HashMap<String, Event>, root_id: &str) -> Option<ThreadNode<'a>> {
    let root = notes.get(root_id)?;
    let mut visited = HashSet::new();
    visited.insert(root_id.to_string());
    let replies = descend(notes, root_id, Marker::Root, &mut visited);
    Some(ThreadNode { note: root, replies })
}

fn descend<'a>(
    notes: &'a HashMap<String, Event>,
    parent_id: &str,
    marker: Marker,
    visited: &mut HashSet<String>,
) -> Vec<ThreadNode<'a>> {
    let mut out = Vec::new();
    for reply in replies_of(notes, parent_id, marker) {
        if !visited.insert(reply.id.clone()) {
            continue;
        }
        let replies = descend(notes, &reply.id, Marker::Reply, visited);
        out.push(ThreadNode { note: reply, replies });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::KIND_TEXT_NOTE;

    fn note(id: &str, created_at: u64, tags: Vec<Tag>) -> Event {
        Event {
            id: id.into(),
            pubkey: "author".into(),
            created_at,
            kind: KIND_TEXT_NOTE,
            tags,
            content: format!("note {id}"),
            sig: String::new(),
        }
    }

    fn store(notes: Vec<Event>) -> HashMap<String, Event> {
        notes.into_iter().map(|n| (n.id.clone(), n)).collect()
    }

    fn ids(notes: &[&Event]) -> Vec<String> {
        notes.iter().map(|n| n.id.clone()).collect()
    }

    #[test]
    fn notes_without_e_tags_are_roots() {
        let notes = store(vec![
            note("a", 1, vec![]),
            note("b", 2, vec![Tag::new(["p", "pk"])]),
            note("c", 3, vec![Tag::new(["e", "a"])]),
        ]);
        assert_eq!(ids(&root_notes(&notes)), vec!["b", "a"]);
    }

    #[test]
    fn roots_are_sorted_newest_first() {
        let notes = store(vec![
            note("old", 1, vec![]),
            note("new", 3, vec![]),
            note("mid", 2, vec![]),
        ]);
        assert_eq!(ids(&root_notes(&notes)), vec!["new", "mid", "old"]);
    }

    #[test]
    fn marked_root_reply() {
        // B replies to root A with a marked tag plus a mention, so the
        // lone-root-tag exclusion does not apply.
        let notes = store(vec![
            note("a", 1, vec![]),
            note(
                "b",
                2,
                vec![
                    Tag::new(["e", "a", "", "root"]),
                    Tag::new(["e", "x", "", "mention"]),
                ],
            ),
        ]);
        assert_eq!(ids(&replies_of(&notes, "a", Marker::Root)), vec!["b"]);
    }

    #[test]
    fn lone_root_marked_tag_is_not_a_root_reply() {
        // Single marked tag: B carries only ["e", A, "", "root"].
        let a = note("a", 1, vec![]);
        let b = note("b", 2, vec![Tag::new(["e", "a", "", "root"])]);
        let notes = store(vec![a, b.clone()]);
        // The marker matches but the exclusion for a lone root tag kicks in.
        assert!(!references(&b, "a", Marker::Root));
        assert!(replies_of(&notes, "a", Marker::Root).is_empty());
    }

    #[test]
    fn marked_reply_and_mention() {
        let c = note(
            "c",
            3,
            vec![
                Tag::new(["e", "a", "", "root"]),
                Tag::new(["e", "b", "", "reply"]),
                Tag::new(["e", "m", "", "mention"]),
            ],
        );
        assert!(references(&c, "b", Marker::Reply));
        assert!(references(&c, "m", Marker::Mention));
        assert!(!references(&c, "b", Marker::Root));
        assert!(!references(&c, "a", Marker::Reply));
    }

    #[test]
    fn positional_single_reference_is_a_root_reply() {
        // Same classification as the marked root case despite a different
        // tag shape: one unmarked e tag pointing at A.
        let notes = store(vec![
            note("a", 1, vec![]),
            note("c", 2, vec![Tag::new(["e", "a"])]),
        ]);
        assert_eq!(ids(&replies_of(&notes, "a", Marker::Root)), vec!["c"]);
    }

    #[test]
    fn positional_chain_last_tag_is_the_parent() {
        let d = note("d", 3, vec![Tag::new(["e", "a"]), Tag::new(["e", "c"])]);
        let notes = store(vec![
            note("a", 1, vec![]),
            note("c", 2, vec![Tag::new(["e", "a"])]),
            d.clone(),
        ]);
        assert_eq!(ids(&replies_of(&notes, "c", Marker::Reply)), vec!["d"]);
        assert!(!references(&d, "a", Marker::Root));
        assert!(replies_of(&notes, "a", Marker::Root)
            .iter()
            .all(|n| n.id != "d"));
        // Two tags means no interior tags, so nothing is a mention.
        assert!(!references(&d, "a", Marker::Mention));
        assert!(!references(&d, "c", Marker::Mention));
    }

    #[test]
    fn positional_interior_tags_are_mentions() {
        let e = note(
            "e",
            4,
            vec![
                Tag::new(["e", "root"]),
                Tag::new(["e", "m1"]),
                Tag::new(["e", "m2"]),
                Tag::new(["e", "parent"]),
            ],
        );
        assert!(references(&e, "m1", Marker::Mention));
        assert!(references(&e, "m2", Marker::Mention));
        assert!(references(&e, "parent", Marker::Reply));
        assert!(!references(&e, "root", Marker::Mention));
        assert!(!references(&e, "parent", Marker::Mention));
        assert!(!references(&e, "root", Marker::Root));
    }

    #[test]
    fn replies_are_sorted_newest_first() {
        let notes = store(vec![
            note("a", 1, vec![]),
            note("r1", 2, vec![Tag::new(["e", "a"])]),
            note("r2", 4, vec![Tag::new(["e", "a"])]),
            note("r3", 3, vec![Tag::new(["e", "a"])]),
        ]);
        assert_eq!(
            ids(&replies_of(&notes, "a", Marker::Root)),
            vec!["r2", "r3", "r1"]
        );
    }

    #[test]
    fn one_marked_tag_switches_the_whole_note_to_marked_mode() {
        // The unmarked tag would be the positional parent, but the presence
        // of a marked tag means position carries no meaning.
        let n = note(
            "n",
            2,
            vec![Tag::new(["e", "a", "", "root"]), Tag::new(["e", "b"])],
        );
        assert!(!references(&n, "b", Marker::Reply));
        assert!(references(&n, "a", Marker::Root));
    }

    #[test]
    fn thread_builds_recursive_tree() {
        let notes = store(vec![
            note("a", 1, vec![]),
            note("c", 2, vec![Tag::new(["e", "a"])]),
            note("d", 3, vec![Tag::new(["e", "a"]), Tag::new(["e", "c"])]),
            note("f", 4, vec![Tag::new(["e", "a"]), Tag::new(["e", "d"])]),
        ]);
        let tree = thread(&notes, "a").unwrap();
        assert_eq!(tree.note.id, "a");
        assert_eq!(tree.replies.len(), 1);
        assert_eq!(tree.replies[0].note.id, "c");
        assert_eq!(tree.replies[0].replies[0].note.id, "d");
        assert_eq!(tree.replies[0].replies[0].replies[0].note.id, "f");
    }

    #[test]
    fn thread_terminates_on_tag_cycles() {
        // b and c each claim the other as parent; a naive traversal would
        // recurse between them forever.
        let notes = store(vec![
            note("a", 1, vec![]),
            note(
                "b",
                3,
                vec![
                    Tag::new(["e", "a", "", "root"]),
                    Tag::new(["e", "c", "", "reply"]),
                ],
            ),
            note(
                "c",
                2,
                vec![
                    Tag::new(["e", "a", "", "root"]),
                    Tag::new(["e", "b", "", "reply"]),
                ],
            ),
        ]);
        let tree = thread(&notes, "a").unwrap();
        let mut seen = Vec::new();
        fn walk(node: &ThreadNode, seen: &mut Vec<String>) {
            seen.push(node.note.id.clone());
            for r in &node.replies {
                walk(r, seen);
            }
        }
        walk(&tree, &mut seen);
        let mut unique = seen.clone();
        unique.sort();
        unique.dedup();
        assert_eq!(seen.len(), unique.len(), "no note may appear twice");
    }

    #[test]
    fn thread_of_unknown_id_is_none() {
        let notes = store(vec![note("a", 1, vec![])]);
        assert!(thread(&notes, "missing").is_none());
    }

    #[test]
    fn e_tag_without_id_never_matches() {
        let bare = note("b", 2, vec![Tag::new(["e"])]);
        assert!(!references(&bare, "a", Marker::Root));
        // Still not a root note: it carries an e tag, however malformed.
        let notes = store(vec![note("a", 1, vec![]), bare]);
        assert_eq!(ids(&root_notes(&notes)), vec!["a"]);
    }
}
