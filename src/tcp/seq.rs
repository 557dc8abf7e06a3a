//! Per-direction sequence space: wire sequence numbers to zero-based offsets

/// Determines if sequence number `a` is strictly less than sequence number `b`,
/// accounting for TCP sequence number wrapping.
///
/// This follows RFC 1323: `a < b` if `b - a` is positive when evaluated in 32-bit
/// signed arithmetic.
///
/// # Examples
///
/// ```
/// use losswire::tcp::is_seq_lt;
/// assert!(is_seq_lt(100, 200));
/// // 10 comes after 4_294_967_290 in TCP sequence space
/// assert!(is_seq_lt(4_294_967_290, 10));
/// assert!(!is_seq_lt(200, 100));
/// ```
pub fn is_seq_lt(a: u32, b: u32) -> bool {
    (b.wrapping_sub(a) as i32) > 0
}

/// Determines if sequence number `a` is less than or equal to sequence number `b`,
/// accounting for TCP sequence number wrapping.
///
/// ```
/// use losswire::tcp::is_seq_lte;
/// assert!(is_seq_lte(100, 100));
/// assert!(is_seq_lte(4_294_967_290, 10));
/// assert!(!is_seq_lte(200, 100));
/// ```
pub fn is_seq_lte(a: u32, b: u32) -> bool {
    a == b || is_seq_lt(a, b)
}

/// Maps the raw 32-bit sequence numbers of one direction onto offsets from its origin.
///
/// The origin is the first payload byte (the byte after the SYN when one was seen), so
/// the first byte of data sits at relative offset 0. Offsets are unwrapped into a `u64`
/// against a reference point close to the value, usually the direction's send high-water
/// mark, so a flow keeps a monotonic coordinate across any number of wraps.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceSpace {
    init_seq: Option<u32>,
}

impl SequenceSpace {
    pub fn is_initialized(&self) -> bool {
        self.init_seq.is_some()
    }

    pub fn init_seq(&self) -> Option<u32> {
        self.init_seq
    }

    /// Fix the origin. Later calls are ignored.
    pub fn init(&mut self, origin: u32) {
        if self.init_seq.is_none() {
            self.init_seq = Some(origin);
        }
    }

    /// Offset of `raw` from the origin within a single 32-bit turn.
    ///
    /// ```
    /// use losswire::tcp::SequenceSpace;
    /// let mut space = SequenceSpace::default();
    /// space.init(0xFFFF_FFF0);
    /// assert_eq!(space.offset(0x0000_0010), 0x20);
    /// assert_eq!(space.offset(0xFFFF_FFF8), 8);
    /// ```
    pub fn offset(&self, raw: u32) -> u32 {
        raw.wrapping_sub(self.init_seq.unwrap_or(0))
    }

    /// Relative position of `raw`, unwrapped to the value nearest to `reference`.
    ///
    /// Values that would land before the origin clamp to zero.
    ///
    /// ```
    /// use losswire::tcp::SequenceSpace;
    /// let mut space = SequenceSpace::default();
    /// space.init(1000);
    /// assert_eq!(space.relative(1100, 0), 100);
    /// // one full turn later
    /// assert_eq!(space.relative(1100, (1u64 << 32) + 50), (1u64 << 32) + 100);
    /// ```
    pub fn relative(&self, raw: u32, reference: u64) -> u64 {
        self.position(raw, reference).unwrap_or(0)
    }

    /// Like [`relative`](Self::relative), but `None` when `raw` lies before the origin.
    ///
    /// ```
    /// use losswire::tcp::SequenceSpace;
    /// let mut space = SequenceSpace::default();
    /// space.init(10_000);
    /// assert_eq!(space.position(10_100, 0), Some(100));
    /// assert_eq!(space.position(8_540, 0), None);
    /// assert_eq!(space.position(9_900, 1460), None);
    /// ```
    pub fn position(&self, raw: u32, reference: u64) -> Option<u64> {
        let offset = self.offset(raw);
        let near = reference as u32;
        if is_seq_lte(near, offset) {
            Some(reference + u64::from(offset.wrapping_sub(near)))
        } else {
            reference.checked_sub(u64::from(near.wrapping_sub(offset)))
        }
    }

    /// Wire sequence number of a relative position.
    pub fn absolute(&self, rel: u64) -> u32 {
        self.init_seq.unwrap_or(0).wrapping_add(rel as u32)
    }
}
