//! The engine-side growable memory region.
//!
//! A [`BufferArena`] owns at most one region at a time. Callers ask for a byte
//! count with [`BufferArena::acquire`] and get back an [`Address`]; the region is
//! reused while it is large enough and replaced (old one freed first) with 20%
//! slack when it is not. Data is read and written through typed views so that
//! the byte offset to element index conversion happens in exactly one place,
//! [`Address::element_index`].

use std::fmt;

use crate::error::{KMeansError, Result};
use crate::numeric::{Element, NumericWidth};

/// Byte offset into the arena's flat address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(usize);

impl Address {
    /// Start of the arena region.
    pub const BASE: Address = Address(0);

    pub const fn new(byte_offset: usize) -> Self {
        Address(byte_offset)
    }

    pub const fn byte_offset(self) -> usize {
        self.0
    }

    /// Index of this address in a view of `width`-sized elements.
    pub fn element_index(self, width: NumericWidth) -> Result<usize> {
        let bytes = width.bytes();
        if self.0 % bytes != 0 {
            return Err(KMeansError::Engine(format!(
                "address {self} is not aligned to {bytes}-byte {width} elements"
            )));
        }
        Ok(self.0 / bytes)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Capacity chosen when the arena has to grow to hold `required` bytes:
/// `max(required, ceil(required * 1.2))`.
pub fn grown_capacity(required: usize) -> Option<usize> {
    required.checked_add(required.div_ceil(5))
}

/// Single growable region reused across clustering calls.
///
/// The backing store is a vector of `u64` words so that every `f32`/`f64` view
/// over it is correctly aligned.
#[derive(Debug, Default)]
pub struct BufferArena {
    region: Option<Vec<u64>>,
    capacity: usize,
    allocations: usize,
}

impl BufferArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arena with a region of at least `bytes` reserved up front.
    pub fn with_capacity(bytes: usize) -> Result<Self> {
        let mut arena = Self::new();
        if bytes > 0 {
            arena.acquire(bytes)?;
        }
        Ok(arena)
    }

    /// Current capacity in bytes (zero when no region is held).
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_allocated(&self) -> bool {
        self.region.is_some()
    }

    /// Number of regions allocated over the arena's lifetime.
    pub fn allocations(&self) -> usize {
        self.allocations
    }

    /// Return an address with at least `required` contiguous bytes behind it.
    pub fn acquire(&mut self, required: usize) -> Result<Address> {
        if required <= self.capacity {
            if self.region.is_some() {
                tracing::debug!(
                    required,
                    capacity = self.capacity,
                    "reusing arena region"
                );
            }
            return Ok(Address::BASE);
        }

        // The previous region must be gone before the next one exists.
        self.release();

        let target = grown_capacity(required).ok_or_else(|| KMeansError::Allocation {
            requested: required,
            reason: "capacity overflows usize".into(),
        })?;
        let words = target.div_ceil(std::mem::size_of::<u64>());

        let mut region: Vec<u64> = Vec::new();
        region
            .try_reserve_exact(words)
            .map_err(|err| KMeansError::Allocation {
                requested: target,
                reason: err.to_string(),
            })?;
        region.resize(words, 0);

        self.region = Some(region);
        self.capacity = target;
        self.allocations += 1;
        tracing::debug!(required, capacity = target, "grew arena region");
        Ok(Address::BASE)
    }

    /// Free the region, if any. Safe to call repeatedly.
    pub fn release(&mut self) {
        if let Some(region) = self.region.take() {
            tracing::debug!(capacity = self.capacity, "released arena region");
            drop(region);
        }
        self.capacity = 0;
    }

    /// Borrow `len` elements of type `T` starting at `address`.
    pub fn view<T: Element>(&self, address: Address, len: usize) -> Result<&[T]> {
        let range = self.element_range::<T>(address, len)?;
        let words = self.region.as_deref().unwrap_or(&[]);
        let typed: &[T] = bytemuck::try_cast_slice(words)
            .map_err(|err| KMeansError::Engine(format!("arena view cast failed: {err}")))?;
        Ok(&typed[range])
    }

    /// Mutably borrow `len` elements of type `T` starting at `address`.
    pub fn view_mut<T: Element>(&mut self, address: Address, len: usize) -> Result<&mut [T]> {
        let range = self.element_range::<T>(address, len)?;
        let words = self.region.as_deref_mut().unwrap_or(&mut []);
        let typed: &mut [T] = bytemuck::try_cast_slice_mut(words)
            .map_err(|err| KMeansError::Engine(format!("arena view cast failed: {err}")))?;
        Ok(&mut typed[range])
    }

    /// Copy raw `bytes` into the region starting at `address`.
    pub fn write_bytes(&mut self, address: Address, bytes: &[u8]) -> Result<()> {
        let start = address.byte_offset();
        let end = start
            .checked_add(bytes.len())
            .filter(|&end| end <= self.capacity)
            .ok_or_else(|| {
                KMeansError::Engine(format!(
                    "write of {} bytes at {address} exceeds arena capacity of {} bytes",
                    bytes.len(),
                    self.capacity
                ))
            })?;
        let words = self.region.as_deref_mut().unwrap_or(&mut []);
        let raw: &mut [u8] = bytemuck::cast_slice_mut(words);
        raw[start..end].copy_from_slice(bytes);
        Ok(())
    }

    fn element_range<T: Element>(
        &self,
        address: Address,
        len: usize,
    ) -> Result<std::ops::Range<usize>> {
        let start = address.element_index(T::WIDTH)?;
        let end_bytes = start
            .checked_add(len)
            .and_then(|end| end.checked_mul(T::WIDTH.bytes()));
        match end_bytes {
            Some(bytes) if bytes <= self.capacity => Ok(start..start + len),
            _ => Err(KMeansError::Engine(format!(
                "view of {len} {} elements at {address} exceeds arena capacity of {} bytes",
                T::WIDTH,
                self.capacity
            ))),
        }
    }
}

impl Drop for BufferArena {
    fn drop(&mut self) {
        self.release();
    }
}
