//! Persistent vector implemented as a 32-way branching trie with a tail buffer.
//!
//! The layout follows Clojure's persistent vector: the last (up to) 32
//! elements live in `tail`, everything before them lives in leaves of a trie
//! rooted at `root`. `shift` is the trie depth times five. Every update
//! path-copies the nodes between the root and the edited slot and shares all
//! other subtrees with the previous version, which stays valid and unchanged.
//!
//! Time complexity: `O(log₃₂ n)` for `at`, `assoc_at` and `pop_last`,
//! amortised `O(1)` for `append`.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::{DoubleEndedIterator, FromIterator, FusedIterator};
use std::ops::Index;
use std::sync::Arc;

use thiserror::Error;

const BRANCH_BITS: u32 = 5;
const BRANCH_FACTOR: usize = 1 << BRANCH_BITS; // 32
const MASK: usize = BRANCH_FACTOR - 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VectorError {
    #[error("Index {index} is out of bounds [0, {count})")]
    IndexOutOfBounds { index: usize, count: usize },
    #[error("Can't pop empty vector")]
    PopEmpty,
}

enum Node<T> {
    Branch(Vec<Arc<Node<T>>>),
    Leaf(Vec<T>),
}

impl<T> Node<T> {
    fn empty_branch() -> Arc<Self> {
        Arc::new(Node::Branch(Vec::new()))
    }

    fn children(&self) -> &[Arc<Node<T>>] {
        match self {
            Node::Branch(children) => children,
            Node::Leaf(_) => unreachable!("leaf nodes only exist at level 0"),
        }
    }

    fn values(&self) -> &[T] {
        match self {
            Node::Leaf(values) => values,
            Node::Branch(_) => unreachable!("branch nodes never appear at level 0"),
        }
    }

    /// Wraps `node` in single-child branches until it sits `level` bits deep.
    fn new_path(level: u32, node: Arc<Node<T>>) -> Arc<Node<T>> {
        if level == 0 {
            return node;
        }
        Arc::new(Node::Branch(vec![Node::new_path(level - BRANCH_BITS, node)]))
    }
}

/// Immutable indexed sequence with structural sharing.
pub struct Vector<T> {
    count: usize,
    shift: u32,
    root: Arc<Node<T>>,
    tail: Arc<Vec<T>>,
}

impl<T> Clone for Vector<T> {
    fn clone(&self) -> Self {
        Self {
            count: self.count,
            shift: self.shift,
            root: self.root.clone(),
            tail: self.tail.clone(),
        }
    }
}

impl<T> Vector<T> {
    /// Creates a new empty vector.
    ///
    /// # Examples
    ///
    /// ```
    /// use ember::collections::Vector;
    ///
    /// let vec: Vector<i32> = Vector::new();
    /// assert!(vec.is_empty());
    /// ```
    pub fn new() -> Self {
        Self {
            count: 0,
            shift: BRANCH_BITS,
            root: Node::empty_branch(),
            tail: Arc::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn tail_offset(&self) -> usize {
        if self.count < BRANCH_FACTOR {
            0
        } else {
            ((self.count - 1) >> BRANCH_BITS) << BRANCH_BITS
        }
    }

    /// Returns the leaf array holding `index`. The caller checks bounds.
    fn leaf_for(&self, index: usize) -> &[T] {
        if index >= self.tail_offset() {
            return &self.tail;
        }
        let mut node = &self.root;
        let mut level = self.shift;
        while level > 0 {
            node = &node.children()[(index >> level) & MASK];
            level -= BRANCH_BITS;
        }
        node.values()
    }

    /// Returns a reference to the element at `index`, or `None` when the index
    /// is out of bounds.
    ///
    /// # Examples
    ///
    /// ```
    /// use ember::collections::Vector;
    ///
    /// let vec: Vector<i32> = (0..100).collect();
    /// assert_eq!(vec.get(42), Some(&42));
    /// assert_eq!(vec.get(100), None);
    /// ```
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.count {
            return None;
        }
        self.leaf_for(index).get(index & MASK)
    }

    /// Like [`Vector::get`], but reports an index error.
    pub fn at(&self, index: usize) -> Result<&T, VectorError> {
        self.get(index)
            .ok_or(VectorError::IndexOutOfBounds { index, count: self.count })
    }

    pub fn last(&self) -> Option<&T> {
        self.tail.last()
    }

    /// Borrowing iterator, usable from both ends.
    ///
    /// ```
    /// use ember::collections::Vector;
    ///
    /// let vec: Vector<i32> = (1..=3).collect();
    /// let reversed: Vec<_> = vec.iter().rev().copied().collect();
    /// assert_eq!(reversed, vec![3, 2, 1]);
    /// ```
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { vector: self, index: 0, end: self.count, leaf: &[], leaf_base: 0 }
    }

    /// Element-wise, positional comparison against any indexed sequence.
    pub fn equiv<S>(&self, other: &S) -> bool
    where
        T: PartialEq,
        S: Indexed<T> + ?Sized,
    {
        if self.count != other.count() {
            return false;
        }
        self.iter().enumerate().all(|(i, item)| other.nth(i) == Some(item))
    }
}

impl<T: Clone> Vector<T> {
    /// Appends `value`, returning a new vector. `self` is left untouched.
    ///
    /// # Examples
    ///
    /// ```
    /// use ember::collections::Vector;
    ///
    /// let v1 = Vector::new();
    /// let v2 = v1.append(1);
    /// assert_eq!(v1.len(), 0);
    /// assert_eq!(v2.get(0), Some(&1));
    /// ```
    pub fn append(&self, value: T) -> Self {
        if self.count - self.tail_offset() < BRANCH_FACTOR {
            let mut tail = Vec::with_capacity(self.tail.len() + 1);
            tail.extend_from_slice(&self.tail);
            tail.push(value);
            return Self {
                count: self.count + 1,
                shift: self.shift,
                root: self.root.clone(),
                tail: Arc::new(tail),
            };
        }

        // Full tail: fold it into the trie and start a fresh tail.
        let tail_node = Arc::new(Node::Leaf(self.tail.as_ref().clone()));
        let (root, shift) = if (self.count >> BRANCH_BITS) > (1 << self.shift) {
            let root = Arc::new(Node::Branch(vec![
                self.root.clone(),
                Node::new_path(self.shift, tail_node),
            ]));
            (root, self.shift + BRANCH_BITS)
        } else {
            (self.push_tail(self.shift, &self.root, tail_node), self.shift)
        };

        let mut tail = Vec::with_capacity(BRANCH_FACTOR);
        tail.push(value);
        Self { count: self.count + 1, shift, root, tail: Arc::new(tail) }
    }

    fn push_tail(
        &self,
        level: u32,
        parent: &Arc<Node<T>>,
        tail_node: Arc<Node<T>>,
    ) -> Arc<Node<T>> {
        let subidx = ((self.count - 1) >> level) & MASK;
        let mut children = parent.children().to_vec();
        let inserted = if level == BRANCH_BITS {
            tail_node
        } else {
            match children.get(subidx) {
                Some(child) => self.push_tail(level - BRANCH_BITS, child, tail_node),
                None => Node::new_path(level - BRANCH_BITS, tail_node),
            }
        };
        if subidx < children.len() {
            children[subidx] = inserted;
        } else {
            children.push(inserted);
        }
        Arc::new(Node::Branch(children))
    }

    /// Replaces the element at `index`. `index == len()` appends.
    ///
    /// ```
    /// use ember::collections::Vector;
    ///
    /// let vec: Vector<i32> = (0..64).collect();
    /// let updated = vec.assoc_at(10, 99).unwrap();
    /// assert_eq!(updated.get(10), Some(&99));
    /// assert_eq!(vec.get(10), Some(&10));
    /// assert!(vec.assoc_at(65, 0).is_err());
    /// ```
    pub fn assoc_at(&self, index: usize, value: T) -> Result<Self, VectorError> {
        if index == self.count {
            return Ok(self.append(value));
        }
        if index > self.count {
            return Err(VectorError::IndexOutOfBounds { index, count: self.count });
        }

        if index >= self.tail_offset() {
            let mut tail = self.tail.as_ref().clone();
            tail[index & MASK] = value;
            return Ok(Self {
                count: self.count,
                shift: self.shift,
                root: self.root.clone(),
                tail: Arc::new(tail),
            });
        }

        Ok(Self {
            count: self.count,
            shift: self.shift,
            root: Self::assoc_in(self.shift, &self.root, index, value),
            tail: self.tail.clone(),
        })
    }

    fn assoc_in(level: u32, node: &Arc<Node<T>>, index: usize, value: T) -> Arc<Node<T>> {
        if level == 0 {
            let mut values = node.values().to_vec();
            values[index & MASK] = value;
            return Arc::new(Node::Leaf(values));
        }
        let subidx = (index >> level) & MASK;
        let mut children = node.children().to_vec();
        children[subidx] = Self::assoc_in(level - BRANCH_BITS, &children[subidx], index, value);
        Arc::new(Node::Branch(children))
    }

    /// Removes the last element, returning the shorter vector.
    ///
    /// ```
    /// use ember::collections::Vector;
    ///
    /// let vec: Vector<i32> = (0..40).collect();
    /// let popped = vec.pop_last().unwrap();
    /// assert_eq!(popped.len(), 39);
    /// assert_eq!(vec.len(), 40);
    /// assert!(Vector::<i32>::new().pop_last().is_err());
    /// ```
    pub fn pop_last(&self) -> Result<Self, VectorError> {
        match self.count {
            0 => return Err(VectorError::PopEmpty),
            1 => return Ok(Self::new()),
            _ => {}
        }

        if self.count - self.tail_offset() > 1 {
            let mut tail = self.tail.as_ref().clone();
            tail.pop();
            return Ok(Self {
                count: self.count - 1,
                shift: self.shift,
                root: self.root.clone(),
                tail: Arc::new(tail),
            });
        }

        // The tail empties: the rightmost leaf of the trie becomes the tail.
        let tail = self.leaf_for(self.count - 2).to_vec();
        let mut root = self.pop_tail(self.shift, &self.root).unwrap_or_else(Node::empty_branch);
        let mut shift = self.shift;
        if shift > BRANCH_BITS && root.children().len() < 2 {
            root = root.children()[0].clone();
            shift -= BRANCH_BITS;
        }

        Ok(Self { count: self.count - 1, shift, root, tail: Arc::new(tail) })
    }

    fn pop_tail(&self, level: u32, node: &Arc<Node<T>>) -> Option<Arc<Node<T>>> {
        let subidx = ((self.count - 2) >> level) & MASK;
        let children = node.children();
        if level > BRANCH_BITS {
            let new_child = self.pop_tail(level - BRANCH_BITS, &children[subidx]);
            if new_child.is_none() && subidx == 0 {
                return None;
            }
            let mut updated = children[..subidx].to_vec();
            updated.extend(new_child);
            Some(Arc::new(Node::Branch(updated)))
        } else if subidx == 0 {
            None
        } else {
            Some(Arc::new(Node::Branch(children[..subidx].to_vec())))
        }
    }

    /// Owned, lazy front-to-back view. Keeps the vector alive on its own.
    pub fn seq(&self) -> Seq<T> {
        Seq { vector: self.clone(), front: 0, back: self.count }
    }

    /// Owned, lazy back-to-front view.
    pub fn rseq(&self) -> std::iter::Rev<Seq<T>> {
        self.seq().rev()
    }
}

impl<T> Default for Vector<T> {
    fn default() -> Self {
        Self::new()
    }
}

//===----------------------------------------------------------------------===//
// Indexed sequences, equality and hashing
//===----------------------------------------------------------------------===//

/// Anything with a count and positional access. Vectors compare equal to any
/// indexed sequence holding equal elements in the same positions.
pub trait Indexed<T> {
    fn count(&self) -> usize;
    fn nth(&self, index: usize) -> Option<&T>;
}

impl<T> Indexed<T> for Vector<T> {
    fn count(&self) -> usize {
        self.count
    }

    fn nth(&self, index: usize) -> Option<&T> {
        self.get(index)
    }
}

impl<T> Indexed<T> for [T] {
    fn count(&self) -> usize {
        self.len()
    }

    fn nth(&self, index: usize) -> Option<&T> {
        self.get(index)
    }
}

impl<T> Indexed<T> for Vec<T> {
    fn count(&self) -> usize {
        self.len()
    }

    fn nth(&self, index: usize) -> Option<&T> {
        self.get(index)
    }
}

/// Hashes an indexed sequence so that equal sequences hash equally whatever
/// their concrete type.
pub fn hash_indexed<T, S, H>(seq: &S, state: &mut H)
where
    T: Hash,
    S: Indexed<T> + ?Sized,
    H: Hasher,
{
    let count = seq.count();
    count.hash(state);
    for i in 0..count {
        if let Some(item) = seq.nth(i) {
            item.hash(state);
        }
    }
}

impl<T: PartialEq> PartialEq for Vector<T> {
    fn eq(&self, other: &Self) -> bool {
        self.equiv(other)
    }
}

impl<T: PartialEq> PartialEq<[T]> for Vector<T> {
    fn eq(&self, other: &[T]) -> bool {
        self.equiv(other)
    }
}

impl<T: PartialEq> PartialEq<Vec<T>> for Vector<T> {
    fn eq(&self, other: &Vec<T>) -> bool {
        self.equiv(other)
    }
}

impl<T: Eq> Eq for Vector<T> {}

impl<T: Hash> Hash for Vector<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        hash_indexed(self, state)
    }
}

impl<T: fmt::Debug> fmt::Debug for Vector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T> Index<usize> for Vector<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        match self.get(index) {
            Some(item) => item,
            None => panic!("index {} out of bounds for vector of length {}", index, self.count),
        }
    }
}

impl<T: Clone> FromIterator<T> for Vector<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        iter.into_iter().fold(Vector::new(), |vec, item| vec.append(item))
    }
}

//===----------------------------------------------------------------------===//
// Iteration
//===----------------------------------------------------------------------===//

pub struct Iter<'a, T> {
    vector: &'a Vector<T>,
    index: usize,
    end: usize,
    // Leaf holding `index`, cached so forward iteration walks the trie once per leaf.
    leaf: &'a [T],
    leaf_base: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        if self.index >= self.end {
            return None;
        }
        if self.index - self.leaf_base >= self.leaf.len() || self.leaf.is_empty() {
            self.leaf = self.vector.leaf_for(self.index);
            self.leaf_base = self.index & !MASK;
        }
        let item = &self.leaf[self.index - self.leaf_base];
        self.index += 1;
        Some(item)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.index;
        (remaining, Some(remaining))
    }
}

impl<'a, T> DoubleEndedIterator for Iter<'a, T> {
    fn next_back(&mut self) -> Option<Self::Item> {
        if self.index >= self.end {
            return None;
        }
        self.end -= 1;
        self.vector.get(self.end)
    }
}

impl<'a, T> ExactSizeIterator for Iter<'a, T> {}
impl<'a, T> FusedIterator for Iter<'a, T> {}

impl<'a, T> IntoIterator for &'a Vector<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Owned read-only view produced by [`Vector::seq`] and [`Vector::rseq`].
#[derive(Clone)]
pub struct Seq<T> {
    vector: Vector<T>,
    front: usize,
    back: usize,
}

impl<T: Clone> Iterator for Seq<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        if self.front >= self.back {
            return None;
        }
        let item = self.vector.get(self.front).cloned();
        self.front += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.back - self.front;
        (remaining, Some(remaining))
    }
}

impl<T: Clone> DoubleEndedIterator for Seq<T> {
    fn next_back(&mut self) -> Option<T> {
        if self.front >= self.back {
            return None;
        }
        self.back -= 1;
        self.vector.get(self.back).cloned()
    }
}

impl<T: Clone> ExactSizeIterator for Seq<T> {}
