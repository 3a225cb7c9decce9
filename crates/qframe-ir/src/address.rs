//! Qubit address scheme.
//!
//! A [`QubitHandle`] is an opaque fixed-width decimal token. Under the
//! segmented layout it packs `owner | dim | chunk | local` into fields of
//! 1, 2, 5 and 2 digits; under the flat layout it is a 7-digit slot index.
//! Values that do not fit their field are rejected, never truncated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{IrError, IrResult};

/// Opaque qubit address token handed out to application code.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QubitHandle(String);

impl QubitHandle {
    /// Wrap a raw token. The token is only validated when decoded.
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// The raw token.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for QubitHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Decoded location of a qubit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Address {
    /// Id of the worker owning the chunk.
    pub owner: u32,
    /// Qudit dimension.
    pub dim: u32,
    /// Chunk index within the owner.
    pub chunk: u32,
    /// Qubit index within the chunk.
    pub local: u32,
}

impl Address {
    /// Create a new address.
    pub fn new(owner: u32, dim: u32, chunk: u32, local: u32) -> Self {
        Self {
            owner,
            dim,
            chunk,
            local,
        }
    }

    /// Key identifying the chunk this qubit lives in.
    pub fn chunk_key(&self) -> (u32, u32) {
        (self.owner, self.chunk)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "w{}/d{}/c{}/q{}",
            self.owner, self.dim, self.chunk, self.local
        )
    }
}

/// Digit widths of the segmented layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldWidths {
    pub owner: u32,
    pub dim: u32,
    pub chunk: u32,
    pub local: u32,
}

impl Default for FieldWidths {
    fn default() -> Self {
        Self {
            owner: 1,
            dim: 2,
            chunk: 5,
            local: 2,
        }
    }
}

/// Address layout shared by a coordinator and its workers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddressLayout {
    /// `owner | dim | chunk | local` fields.
    Segmented(FieldWidths),
    /// A single slot index; owner 0, dimension 2, local 0.
    Flat {
        /// Number of digits.
        width: u32,
    },
}

impl Default for AddressLayout {
    fn default() -> Self {
        AddressLayout::segmented()
    }
}

fn field_max(width: u32) -> u64 {
    10u64.pow(width) - 1
}

fn check_field(field: &'static str, value: u32, width: u32) -> IrResult<()> {
    let max = field_max(width);
    if u64::from(value) > max {
        return Err(IrError::AddressOverflow {
            field,
            value: u64::from(value),
            max,
        });
    }
    Ok(())
}

impl AddressLayout {
    /// Segmented layout with the default 1/2/5/2 widths.
    pub fn segmented() -> Self {
        AddressLayout::Segmented(FieldWidths::default())
    }

    /// Flat layout with 7 digits.
    pub fn flat() -> Self {
        AddressLayout::Flat { width: 7 }
    }

    /// Total token width in digits.
    pub fn width(&self) -> usize {
        match self {
            AddressLayout::Segmented(w) => (w.owner + w.dim + w.chunk + w.local) as usize,
            AddressLayout::Flat { width } => *width as usize,
        }
    }

    /// Largest encodable owner id.
    pub fn max_owner(&self) -> u64 {
        match self {
            AddressLayout::Segmented(w) => field_max(w.owner),
            AddressLayout::Flat { .. } => 0,
        }
    }

    /// Largest encodable dimension.
    pub fn max_dim(&self) -> u64 {
        match self {
            AddressLayout::Segmented(w) => field_max(w.dim),
            AddressLayout::Flat { .. } => 2,
        }
    }

    /// Largest encodable chunk index (slot index for the flat layout).
    pub fn max_chunk(&self) -> u64 {
        match self {
            AddressLayout::Segmented(w) => field_max(w.chunk),
            AddressLayout::Flat { width } => field_max(*width),
        }
    }

    /// Largest encodable qubit index within a chunk.
    pub fn max_local(&self) -> u64 {
        match self {
            AddressLayout::Segmented(w) => field_max(w.local),
            AddressLayout::Flat { .. } => 0,
        }
    }

    /// The largest address every field of this layout can hold.
    pub fn capacity(&self) -> Address {
        let clamp = |v: u64| u32::try_from(v).unwrap_or(u32::MAX);
        Address {
            owner: clamp(self.max_owner()),
            dim: clamp(self.max_dim()),
            chunk: clamp(self.max_chunk()),
            local: clamp(self.max_local()),
        }
    }

    /// Encode an address into a handle.
    pub fn encode(&self, addr: &Address) -> IrResult<QubitHandle> {
        match self {
            AddressLayout::Segmented(w) => {
                check_field("owner", addr.owner, w.owner)?;
                check_field("dim", addr.dim, w.dim)?;
                check_field("chunk", addr.chunk, w.chunk)?;
                check_field("local", addr.local, w.local)?;
                Ok(QubitHandle(format!(
                    "{:0ow$}{:0dw$}{:0cw$}{:0lw$}",
                    addr.owner,
                    addr.dim,
                    addr.chunk,
                    addr.local,
                    ow = w.owner as usize,
                    dw = w.dim as usize,
                    cw = w.chunk as usize,
                    lw = w.local as usize,
                )))
            }
            AddressLayout::Flat { width } => {
                if addr.dim != 2 {
                    return Err(IrError::UnsupportedDimension {
                        what: "flat address".to_string(),
                        dim: addr.dim,
                    });
                }
                check_field("owner", addr.owner, 0)?;
                check_field("local", addr.local, 0)?;
                check_field("chunk", addr.chunk, *width)?;
                Ok(QubitHandle(format!(
                    "{:0w$}",
                    addr.chunk,
                    w = *width as usize
                )))
            }
        }
    }

    /// Decode a handle back into its address.
    pub fn decode(&self, handle: &QubitHandle) -> IrResult<Address> {
        let token = handle.as_str();
        if token.len() != self.width() || !token.bytes().all(|b| b.is_ascii_digit()) {
            return Err(IrError::MalformedHandle(token.to_string()));
        }
        let parse = |s: &str| {
            s.parse::<u32>()
                .map_err(|_| IrError::MalformedHandle(token.to_string()))
        };

        match self {
            AddressLayout::Segmented(w) => {
                let (owner, rest) = token.split_at(w.owner as usize);
                let (dim, rest) = rest.split_at(w.dim as usize);
                let (chunk, local) = rest.split_at(w.chunk as usize);
                Ok(Address {
                    owner: parse(owner)?,
                    dim: parse(dim)?,
                    chunk: parse(chunk)?,
                    local: parse(local)?,
                })
            }
            AddressLayout::Flat { .. } => Ok(Address {
                owner: 0,
                dim: 2,
                chunk: parse(token)?,
                local: 0,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segmented_layout() {
        let layout = AddressLayout::segmented();
        let handle = layout.encode(&Address::new(3, 2, 41, 7)).unwrap();
        assert_eq!(handle.as_str(), "3020004107");
        assert_eq!(layout.decode(&handle).unwrap(), Address::new(3, 2, 41, 7));
    }

    #[test]
    fn test_flat_layout() {
        let layout = AddressLayout::flat();
        let handle = layout.encode(&Address::new(0, 2, 1234, 0)).unwrap();
        assert_eq!(handle.as_str(), "0001234");
        assert_eq!(
            layout.decode(&handle).unwrap(),
            Address::new(0, 2, 1234, 0)
        );
    }

    #[test]
    fn test_overflow_is_rejected() {
        let layout = AddressLayout::segmented();
        let err = layout.encode(&Address::new(0, 2, 100_000, 0)).unwrap_err();
        assert_eq!(
            err,
            IrError::AddressOverflow {
                field: "chunk",
                value: 100_000,
                max: 99_999
            }
        );
        assert!(layout.encode(&Address::new(10, 2, 0, 0)).is_err());
        assert!(layout.encode(&Address::new(0, 2, 0, 100)).is_err());
    }

    #[test]
    fn test_flat_rejects_qutrits() {
        let layout = AddressLayout::flat();
        assert!(layout.encode(&Address::new(0, 3, 0, 0)).is_err());
        assert!(layout.encode(&Address::new(1, 2, 0, 0)).is_err());
    }

    #[test]
    fn test_malformed_handles() {
        let layout = AddressLayout::segmented();
        for token in ["", "123", "30200041071", "30200a4107"] {
            assert!(matches!(
                layout.decode(&QubitHandle::new(token)),
                Err(IrError::MalformedHandle(_))
            ));
        }
    }
}
