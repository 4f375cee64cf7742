//! Persistent context chain threaded through pipeline stages.
//!
//! Every stage reads the keys it needs and appends its own output with
//! [`ContextChain::add`]. Nodes are immutable once created and shared through
//! `Arc`, so several chains can hang off a common prefix and be read from any
//! thread without locking.

use crate::pipeline::error::StageError;
use std::any::{Any, type_name};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Opaque payload stored on a chain node.
pub type Value = Arc<dyn Any + Send + Sync>;

/// Well-known keys exchanged between stages.
pub mod keys {
    /// Samples of one detected utterance ([`crate::pipeline::types::Utterance`]).
    pub const RAW_AUDIO: &str = "raw_audio";
    /// Transcript of the utterance (`String`).
    pub const RECOGNIZED_TEXT: &str = "recognized_text";
    /// Language detected by the transcriber (`String`).
    pub const LANGUAGE_CODE: &str = "language_code";
    /// Text the assistant reply should continue from (`String`).
    pub const START_PHRASE: &str = "start_phrase";
    /// One sentence of the assistant reply (`String`).
    pub const ASSISTANT_SENTENCE: &str = "assistant_sentence";
    /// One PCM chunk of synthesized speech (`Vec<i16>`).
    pub const OUTPUT_AUDIO_CHUNK: &str = "output_audio_chunk";
    /// Stream of synthesized PCM chunks ([`crate::pipeline::stream::AudioStream`]).
    pub const OUTPUT_AUDIO_STREAM: &str = "output_audio_stream";
}

struct Node {
    value: Option<Value>,
    key: Option<&'static str>,
    previous: Option<Arc<Node>>,
    sibling_index: usize,
    /// Number of children handed out by `add`; the only field touched after creation.
    children: AtomicUsize,
}

/// Handle to one node of an append-only, key-addressed value chain.
///
/// Cloning is cheap and yields a handle to the same node.
#[derive(Clone)]
pub struct ContextChain {
    node: Arc<Node>,
}

impl ContextChain {
    /// Creates an empty, untagged root.
    pub fn root() -> Self {
        Self::from_node(None, None, None, 0)
    }

    /// Creates a root holding `value` under `key`.
    pub fn new<T: Any + Send + Sync>(value: T, key: Option<&'static str>) -> Self {
        Self::from_node(Some(Arc::new(value)), key, None, 0)
    }

    fn from_node(
        value: Option<Value>,
        key: Option<&'static str>,
        previous: Option<Arc<Node>>,
        sibling_index: usize,
    ) -> Self {
        Self {
            node: Arc::new(Node {
                value,
                key,
                previous,
                sibling_index,
                children: AtomicUsize::new(0),
            }),
        }
    }

    /// Appends `value` under `key`, returning the new node.
    ///
    /// An untagged node never becomes a parent: children of an untagged node
    /// attach to its own parent, so the untagged value is invisible to lookups
    /// made from them.
    pub fn add<T: Any + Send + Sync>(&self, value: T, key: Option<&'static str>) -> Self {
        self.add_shared(Arc::new(value), key)
    }

    /// Appends an already shared payload under `key`.
    pub fn add_shared(&self, value: Value, key: Option<&'static str>) -> Self {
        let sibling_index = self.node.children.fetch_add(1, Ordering::SeqCst);
        let previous = if self.node.key.is_some() {
            Some(self.node.clone())
        } else {
            self.node.previous.clone()
        };
        Self::from_node(Some(value), key, previous, sibling_index)
    }

    fn find(&self, key: &str) -> Option<&Node> {
        let mut current = Some(self.node.as_ref());
        while let Some(node) = current {
            if node.key == Some(key) {
                return Some(node);
            }
            current = node.previous.as_deref();
        }
        None
    }

    /// Returns the most recently added value for `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.find(key).and_then(|node| node.value.as_ref())
    }

    /// Returns the value for `key` if it holds a `T`.
    pub fn get_as<T: Any>(&self, key: &str) -> Option<&T> {
        self.get(key).and_then(|value| value.downcast_ref::<T>())
    }

    /// Returns a shared handle to the value for `key` if it holds a `T`.
    pub fn get_arc<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get(key)
            .and_then(|value| Arc::downcast::<T>(value.clone()).ok())
    }

    /// Like [`get_as`](Self::get_as) but reports a missing or mistyped key as a
    /// validation error.
    pub fn require<T: Any>(&self, key: &str) -> Result<&T, StageError> {
        self.get_as::<T>(key).ok_or_else(|| StageError::Validation {
            key: key.to_string(),
            expected: type_name::<T>(),
        })
    }

    /// Sibling index of the node that holds `key`.
    ///
    /// For the phrase key this is the phrase id used by interruption filtering.
    pub fn index_of(&self, key: &str) -> Option<usize> {
        self.find(key).map(|node| node.sibling_index)
    }

    /// The index the next `add` on this node will receive.
    pub fn next_sibling_index(&self) -> usize {
        self.node.children.load(Ordering::SeqCst)
    }

    /// Position of this node among the children of its creator.
    pub fn sibling_index(&self) -> usize {
        self.node.sibling_index
    }

    /// Key of this node.
    pub fn key(&self) -> Option<&'static str> {
        self.node.key
    }

    /// Payload of this node.
    pub fn value(&self) -> Option<&Value> {
        self.node.value.as_ref()
    }

    /// Most recent value for every key reachable from this node.
    pub fn to_map(&self) -> HashMap<&'static str, Value> {
        let mut map = HashMap::new();
        let mut current = Some(self.node.as_ref());
        while let Some(node) = current {
            if let (Some(key), Some(value)) = (node.key, node.value.as_ref()) {
                map.entry(key).or_insert_with(|| value.clone());
            }
            current = node.previous.as_deref();
        }
        map
    }
}

impl fmt::Debug for ContextChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut path = Vec::new();
        let mut current = Some(self.node.as_ref());
        while let Some(node) = current {
            path.push((node.key.unwrap_or("-"), node.sibling_index));
            current = node.previous.as_deref();
        }
        f.debug_struct("ContextChain").field("path", &path).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_returns_added_value() {
        let chain = ContextChain::root().add(1u32, Some("k"));
        assert_eq!(chain.get_as::<u32>("k"), Some(&1));
    }

    #[test]
    fn test_most_recent_value_wins() {
        let chain = ContextChain::root()
            .add(1u32, Some("k"))
            .add(2u32, Some("k"));
        assert_eq!(chain.get_as::<u32>("k"), Some(&2));
    }

    #[test]
    fn test_missing_key_is_not_found() {
        let chain = ContextChain::root().add(1u32, Some("k"));
        assert!(chain.get("missing").is_none());
        assert!(chain.index_of("missing").is_none());
    }

    #[test]
    fn test_untagged_node_is_transparent() {
        let chain = ContextChain::root().add(7u32, Some("k"));
        let untagged = chain.add(99u32, None);
        assert_eq!(untagged.get_as::<u32>("k"), chain.get_as::<u32>("k"));

        // Children of an untagged node skip it entirely.
        let child = untagged.add("x".to_string(), Some("other"));
        assert_eq!(child.get_as::<u32>("k"), Some(&7));
        assert!(child.to_map().len() == 2);
    }

    #[test]
    fn test_add_does_not_change_parent() {
        let parent = ContextChain::root().add("a".to_string(), Some("k"));
        let _child = parent.add("b".to_string(), Some("k"));
        assert_eq!(parent.get_as::<String>("k").map(String::as_str), Some("a"));
    }

    #[test]
    fn test_sibling_indices_count_from_zero_per_parent() {
        let root = ContextChain::root();
        let first = root.add(0u8, Some("phrase"));
        let second = root.add(1u8, Some("phrase"));
        let third = root.add(2u8, Some("phrase"));
        assert_eq!(first.sibling_index(), 0);
        assert_eq!(second.sibling_index(), 1);
        assert_eq!(third.sibling_index(), 2);
        assert_eq!(root.next_sibling_index(), 3);

        // A fresh parent starts its own count.
        assert_eq!(third.add(0u8, Some("x")).sibling_index(), 0);
    }

    #[test]
    fn test_index_of_reports_phrase_from_descendants() {
        let root = ContextChain::root();
        let _ = root.add(0u8, Some(keys::RAW_AUDIO));
        let phrase = root.add(1u8, Some(keys::RAW_AUDIO));
        let sentence = phrase
            .add("hello".to_string(), Some(keys::RECOGNIZED_TEXT))
            .add("hi there.".to_string(), Some(keys::ASSISTANT_SENTENCE));
        assert_eq!(sentence.index_of(keys::RAW_AUDIO), Some(1));
        assert_eq!(sentence.index_of(keys::ASSISTANT_SENTENCE), Some(0));
    }

    #[test]
    fn test_shared_prefix_branches_independently() {
        let base = ContextChain::root().add("q".to_string(), Some("text"));
        let a = base.add("a".to_string(), Some("reply"));
        let b = base.add("b".to_string(), Some("reply"));
        assert_eq!(a.get_as::<String>("reply").map(String::as_str), Some("a"));
        assert_eq!(b.get_as::<String>("reply").map(String::as_str), Some("b"));
        assert_eq!(a.get_as::<String>("text"), b.get_as::<String>("text"));
    }

    #[test]
    fn test_require_reports_missing_and_mistyped_keys() {
        let chain = ContextChain::root().add(5u32, Some("n"));
        assert_eq!(chain.require::<u32>("n").ok(), Some(&5));
        assert!(matches!(
            chain.require::<String>("n"),
            Err(StageError::Validation { .. })
        ));
        assert!(matches!(
            chain.require::<u32>("absent"),
            Err(StageError::Validation { .. })
        ));
    }

    #[test]
    fn test_get_arc_shares_payload() {
        let chain = ContextChain::root().add(vec![1i16, 2, 3], Some("pcm"));
        let shared = chain.get_arc::<Vec<i16>>("pcm").unwrap();
        assert_eq!(*shared, vec![1, 2, 3]);
        assert!(chain.get_arc::<String>("pcm").is_none());
    }

    #[test]
    fn test_to_map_keeps_most_recent() {
        let chain = ContextChain::root()
            .add(1u32, Some("a"))
            .add(2u32, Some("b"))
            .add(3u32, Some("a"));
        let map = chain.to_map();
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"].downcast_ref::<u32>(), Some(&3));
        assert_eq!(map["b"].downcast_ref::<u32>(), Some(&2));
    }

    #[test]
    fn test_chain_is_shareable_across_threads() {
        let chain = ContextChain::root().add("shared".to_string(), Some("k"));
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let chain = chain.clone();
                std::thread::spawn(move || chain.add(i, Some("n")).sibling_index())
            })
            .collect();
        let mut indices: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        indices.sort_unstable();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }
}
