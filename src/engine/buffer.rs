// Append-only body buffer with a doubling growth policy.

use bytes::Bytes;

use crate::config::MIN_BUFFER_GROWTH;

/// Returned by [`GrowableBuffer::append`] when the buffer could not grow.
/// Content and capacity are left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocFailed;

#[derive(Debug, Default)]
pub struct GrowableBuffer {
    data: Vec<u8>,
    /// Logical capacity chosen by the growth policy. The vector may hold more.
    capacity: usize,
    /// Growth past this capacity is reported as an allocation failure.
    limit: Option<usize>,
}

impl GrowableBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A buffer that refuses to grow beyond `limit` bytes of capacity.
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }

    /// Copy `bytes` to the end of the content.
    ///
    /// When the append would overflow the current capacity the new capacity
    /// is `2 * max(capacity, len + bytes.len(), 512)`.
    pub fn append(&mut self, bytes: &[u8]) -> Result<(), AllocFailed> {
        let needed = self.data.len().checked_add(bytes.len()).ok_or(AllocFailed)?;
        if needed > self.capacity {
            let target = self
                .capacity
                .max(needed)
                .max(MIN_BUFFER_GROWTH)
                .checked_mul(2)
                .ok_or(AllocFailed)?;
            if self.limit.is_some_and(|limit| target > limit) {
                return Err(AllocFailed);
            }
            self.data
                .try_reserve_exact(target - self.data.len())
                .map_err(|_| AllocFailed)?;
            self.capacity = target;
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// Hand the content over. `None` if no storage was ever allocated.
    pub fn into_bytes(self) -> Option<Bytes> {
        if self.capacity == 0 {
            None
        } else {
            Some(Bytes::from(self.data))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_append_uses_minimum_growth() {
        let mut buf = GrowableBuffer::new();
        buf.append(b"ok").unwrap();
        assert_eq!(buf.len(), 2);
        assert_eq!(buf.capacity(), 2 * MIN_BUFFER_GROWTH);
        assert_eq!(buf.as_slice(), b"ok");
    }

    #[test]
    fn test_large_append_doubles_needed_size() {
        let mut buf = GrowableBuffer::new();
        buf.append(&[7u8; 3000]).unwrap();
        assert_eq!(buf.capacity(), 6000);
        // Fits without growing.
        buf.append(&[8u8; 3000]).unwrap();
        assert_eq!(buf.capacity(), 6000);
        buf.append(&[9u8; 1]).unwrap();
        assert_eq!(buf.capacity(), 12002);
        assert_eq!(buf.len(), 6001);
        assert_eq!(buf.as_slice()[2999], 7);
        assert_eq!(buf.as_slice()[3000], 8);
        assert_eq!(buf.as_slice()[6000], 9);
    }

    #[test]
    fn test_capacity_bound_holds_across_growth_sequences() {
        let sizes = [1usize, 17, 511, 512, 513, 4096, 3, 65536, 100, 12345, 0, 7];
        for start in 0..sizes.len() {
            let mut buf = GrowableBuffer::new();
            let mut total = 0usize;
            for &n in sizes[start..].iter().chain(sizes[..start].iter()) {
                buf.append(&vec![0xAB; n]).unwrap();
                total += n;
                assert!(buf.capacity() >= total);
                assert!(buf.capacity() < 2 * (2 * total + 1024));
            }
            assert_eq!(buf.len(), total);
        }
    }

    #[test]
    fn test_failed_growth_leaves_buffer_untouched() {
        let mut buf = GrowableBuffer::with_limit(2048);
        buf.append(&[1u8; 600]).unwrap();
        assert_eq!(buf.capacity(), 1200);
        assert_eq!(buf.append(&[2u8; 700]), Err(AllocFailed));
        assert_eq!(buf.len(), 600);
        assert_eq!(buf.capacity(), 1200);
        // Small appends that fit still land.
        buf.append(&[3u8; 100]).unwrap();
        assert_eq!(buf.len(), 700);
    }

    #[test]
    fn test_into_bytes_without_allocation_is_none() {
        assert!(GrowableBuffer::new().into_bytes().is_none());

        // An empty append never needs storage.
        let mut buf = GrowableBuffer::new();
        buf.append(b"").unwrap();
        assert!(buf.into_bytes().is_none());

        let mut buf = GrowableBuffer::new();
        buf.append(b"missing").unwrap();
        assert_eq!(buf.into_bytes().unwrap(), Bytes::from_static(b"missing"));
    }
}
