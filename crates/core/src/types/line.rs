//! Line-item value types: the normalized variant key and quantities.

use core::fmt;

use serde::{Deserialize, Serialize};

use super::id::VariantId;

/// Errors produced when building line-item values from client input.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum LineValueError {
    /// Quantities must be at least one.
    #[error("quantity must be at least 1 (got {0})")]
    NotPositive(i64),
    /// Quantity does not fit the storage column.
    #[error("quantity must be at most {max} (got {got})")]
    TooLarge {
        /// Largest accepted quantity.
        max: i64,
        /// The rejected value.
        got: i64,
    },
    /// Variant ids are positive; zero is reserved for "no variant".
    #[error("variant id must be positive (got {0})")]
    InvalidVariant(i32),
}

/// "Which variant" with "no variant" as an explicit value.
///
/// Storage indexes line items by `(cart, product, variant key)`. A nullable
/// variant column inside a unique index treats every NULL as distinct, which
/// would allow duplicate "no variant" rows. The key maps `None` to the
/// sentinel `0` so that the index and every lookup agree.
///
/// ```
/// use cartwright_core::{VariantId, VariantKey};
///
/// assert_eq!(VariantKey::NONE.as_i32(), 0);
/// let key = VariantKey::try_from(Some(VariantId::new(7))).unwrap();
/// assert_eq!(key.as_i32(), 7);
/// assert_eq!(key.variant(), Some(VariantId::new(7)));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct VariantKey(i32);

impl VariantKey {
    /// Storage value meaning "no variant".
    pub const SENTINEL: i32 = 0;

    /// The key for a line item without a variant.
    pub const NONE: Self = Self(Self::SENTINEL);

    /// Rebuild a key from its storage value.
    ///
    /// # Errors
    ///
    /// Returns [`LineValueError::InvalidVariant`] for negative values.
    pub const fn from_i32(value: i32) -> Result<Self, LineValueError> {
        if value < Self::SENTINEL {
            return Err(LineValueError::InvalidVariant(value));
        }
        Ok(Self(value))
    }

    /// The storage value (`0` for "no variant").
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// The variant this key stands for, if any.
    #[must_use]
    pub const fn variant(self) -> Option<VariantId> {
        if self.0 == Self::SENTINEL {
            None
        } else {
            Some(VariantId::new(self.0))
        }
    }

    /// Whether this key is the "no variant" sentinel.
    #[must_use]
    pub const fn is_none(self) -> bool {
        self.0 == Self::SENTINEL
    }
}

impl TryFrom<Option<VariantId>> for VariantKey {
    type Error = LineValueError;

    fn try_from(variant: Option<VariantId>) -> Result<Self, Self::Error> {
        match variant {
            None => Ok(Self::NONE),
            Some(id) if id.as_i32() > Self::SENTINEL => Ok(Self(id.as_i32())),
            Some(id) => Err(LineValueError::InvalidVariant(id.as_i32())),
        }
    }
}

impl fmt::Display for VariantKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.variant() {
            Some(id) => write!(f, "{id}"),
            None => f.write_str("-"),
        }
    }
}

/// A strictly positive item count that fits the storage integer.
///
/// ```
/// use cartwright_core::Quantity;
///
/// assert_eq!(Quantity::new(3).unwrap().get(), 3);
/// assert!(Quantity::new(0).is_err());
/// assert!(Quantity::new(-1).is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Quantity(i32);

impl Quantity {
    /// A quantity of one.
    pub const ONE: Self = Self(1);

    /// Largest representable quantity.
    pub const MAX: i64 = i32::MAX as i64;

    /// Validate a client-supplied quantity.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is below 1 or above [`Quantity::MAX`].
    pub fn new(value: i64) -> Result<Self, LineValueError> {
        if value < 1 {
            return Err(LineValueError::NotPositive(value));
        }
        i32::try_from(value)
            .map(Self)
            .map_err(|_| LineValueError::TooLarge {
                max: Self::MAX,
                got: value,
            })
    }

    /// The quantity as stored.
    #[must_use]
    pub const fn as_i32(self) -> i32 {
        self.0
    }

    /// How much more fits on top of this quantity, or `None` when it is at
    /// [`Quantity::MAX`].
    ///
    /// ```
    /// use cartwright_core::Quantity;
    ///
    /// let near_full = Quantity::new(i64::from(i32::MAX) - 2).unwrap();
    /// assert_eq!(near_full.headroom().unwrap().get(), 2);
    /// assert!(Quantity::new(i64::from(i32::MAX)).unwrap().headroom().is_none());
    /// ```
    #[must_use]
    pub fn headroom(self) -> Option<Self> {
        Self::new(Self::MAX - i64::from(self.0)).ok()
    }

    /// The quantity as an unsigned count.
    #[must_use]
    pub const fn get(self) -> u32 {
        self.0.unsigned_abs()
    }
}

impl TryFrom<i64> for Quantity {
    type Error = LineValueError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Quantity> for i64 {
    fn from(quantity: Quantity) -> Self {
        Self::from(quantity.0)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
