#![forbid(unsafe_code)]

//! Ownership transferring byte accumulator used to build and parse frames.
//!
//! A [`FrameBuffer`] is an ordered list of buckets. Each bucket owns its bytes
//! through a shared owner, and dropping the owner is its release strategy: a
//! `Vec<u8>` is freed, a `&'static [u8]` is left alone, a value passed to
//! [`FrameBuffer::append_with_release`] goes through the given releaser.

use crate::error::Error;
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

type Owner = Arc<dyn AsRef<[u8]> + Send + Sync>;

#[derive(Clone)]
struct Bucket {
    owner: Owner,
    offset: usize,
}

impl Bucket {
    fn remaining(&self) -> &[u8] {
        &AsRef::<[u8]>::as_ref(&*self.owner)[self.offset..]
    }
}

/// Runs `release` on `data` once the bucket holding it goes away.
struct Released<T, F>
where
    F: FnOnce(T),
{
    data: Option<T>,
    release: Option<F>,
}

impl<T, F> AsRef<[u8]> for Released<T, F>
where
    T: AsRef<[u8]>,
    F: FnOnce(T),
{
    fn as_ref(&self) -> &[u8] {
        self.data
            .as_ref()
            .map(|data| AsRef::<[u8]>::as_ref(data))
            .unwrap_or(&[])
    }
}

impl<T, F> Drop for Released<T, F>
where
    F: FnOnce(T),
{
    fn drop(&mut self) {
        if let (Some(data), Some(release)) = (self.data.take(), self.release.take()) {
            release(data);
        }
    }
}

/// Invariant: `size` is the sum of the remaining length of every bucket, and
/// no bucket is empty.
#[derive(Default)]
pub struct FrameBuffer {
    buckets: VecDeque<Bucket>,
    size: usize,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of unconsumed bytes.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Number of buckets currently held.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    /// Copy `bytes` into a newly owned bucket.
    pub fn append_copy(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        self.push(Arc::new(bytes.to_vec()));
    }

    /// Take ownership of `data` without copying. Empty data is dropped on the
    /// spot.
    pub fn append_owned<T>(&mut self, data: T)
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
    {
        if data.as_ref().is_empty() {
            return;
        }
        self.push(Arc::new(data));
    }

    /// Borrow data that outlives every buffer. Nothing is released.
    pub fn append_static(&mut self, bytes: &'static [u8]) {
        self.append_owned(bytes);
    }

    /// Take ownership of `data` and hand it to `release` once its bytes are
    /// consumed or the buffer is dropped. Empty data is released immediately.
    pub fn append_with_release<T, F>(&mut self, data: T, release: F)
    where
        T: AsRef<[u8]> + Send + Sync + 'static,
        F: FnOnce(T) + Send + Sync + 'static,
    {
        let released = Released {
            data: Some(data),
            release: Some(release),
        };
        if released.as_ref().is_empty() {
            return;
        }
        self.push(Arc::new(released));
    }

    /// Move every bucket of `other` to the end of this buffer, leaving `other`
    /// empty. No bytes are copied.
    pub fn append_move_from(&mut self, other: &mut FrameBuffer) {
        self.size += other.size;
        self.buckets.append(&mut other.buckets);
        other.size = 0;
    }

    /// Append the buckets of `other`, sharing their (immutable) storage.
    pub fn append_copy_from(&mut self, other: &FrameBuffer) {
        self.size += other.size;
        self.buckets.extend(other.buckets.iter().cloned());
    }

    /// Discard the first `n` bytes, releasing every fully consumed bucket.
    pub fn consume(&mut self, n: usize) -> Result<(), Error> {
        self.check(n)?;
        let mut left = n;
        while left > 0 {
            let Some(front) = self.buckets.front_mut() else {
                break;
            };
            let len = front.remaining().len();
            if len <= left {
                left -= len;
                self.buckets.pop_front();
            } else {
                front.offset += left;
                left = 0;
            }
        }
        self.size -= n;
        Ok(())
    }

    /// Copy the first `dst.len()` bytes into `dst` without consuming them.
    pub fn flatten(&self, dst: &mut [u8]) -> Result<(), Error> {
        self.check(dst.len())?;
        let mut filled = 0;
        for bucket in &self.buckets {
            if filled == dst.len() {
                break;
            }
            let src = bucket.remaining();
            let take = src.len().min(dst.len() - filled);
            dst[filled..filled + take].copy_from_slice(&src[..take]);
            filled += take;
        }
        Ok(())
    }

    /// [`flatten`](Self::flatten) followed by [`consume`](Self::consume).
    pub fn flatten_consume(&mut self, dst: &mut [u8]) -> Result<(), Error> {
        self.flatten(dst)?;
        self.consume(dst.len())
    }

    /// Split off the first `n` bytes into a new buffer.
    pub fn split_to(&mut self, n: usize) -> Result<FrameBuffer, Error> {
        let mut head = vec![0; n];
        self.flatten_consume(&mut head)?;
        let mut out = FrameBuffer::new();
        out.append_owned(head);
        Ok(out)
    }

    /// Remaining bytes of each bucket, front to back.
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> {
        self.buckets.iter().map(Bucket::remaining)
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.size);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }

    fn push(&mut self, owner: Owner) {
        let len = AsRef::<[u8]>::as_ref(&*owner).len();
        self.size += len;
        self.buckets.push_back(Bucket { owner, offset: 0 });
    }

    fn check(&self, requested: usize) -> Result<(), Error> {
        if requested > self.size {
            return Err(Error::Framing {
                requested,
                available: self.size,
            });
        }
        Ok(())
    }
}

/// Deep copy into a single bucket.
impl Clone for FrameBuffer {
    fn clone(&self) -> Self {
        let mut out = FrameBuffer::new();
        out.append_owned(self.to_vec());
        out
    }
}

impl From<Vec<u8>> for FrameBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        let mut out = FrameBuffer::new();
        out.append_owned(bytes);
        out
    }
}

impl fmt::Debug for FrameBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameBuffer")
            .field("size", &self.size)
            .field("buckets", &self.buckets.len())
            .finish()
    }
}
