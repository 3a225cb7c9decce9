//! qframe intermediate representation
//!
//! Leaf data types shared by every qframe engine and backend:
//!
//! - **Gates**: [`GateCatalog`] resolves a [`GateId`] plus arguments into a
//!   unitary for any qudit dimension it supports
//! - **Noise**: [`Channel`] models bit/phase/Y flips, (asymmetric)
//!   depolarizing and reset channels, in mixture and sampled-gate form
//! - **Addressing**: [`AddressLayout`] packs `(owner, dim, chunk, local)` into a
//!   fixed-width [`QubitHandle`]
//! - **Noise pattern**: [`NoisePattern`] bundles the four channels attached
//!   to a backend
//!
//! # Example
//!
//! ```rust
//! use qframe_ir::{Address, AddressLayout, GateCatalog, GateId};
//!
//! let layout = AddressLayout::segmented();
//! let handle = layout.encode(&Address::new(1, 2, 17, 0)).unwrap();
//! assert_eq!(layout.decode(&handle).unwrap().chunk, 17);
//!
//! let cx = GateCatalog::resolve(GateId::CX, &[], 2, 2).unwrap();
//! assert_eq!(cx.matrix.dim(), (4, 4));
//! ```

pub mod address;
pub mod error;
pub mod gate;
pub mod noise;
pub mod pattern;

pub use address::{Address, AddressLayout, FieldWidths, QubitHandle};
pub use error::{IrError, IrResult};
pub use gate::{GateCatalog, GateId, GateSpec, Matrix, NamedGate, ResolvedGate};
pub use noise::{Branch, Channel, ChannelKind, ChannelOperator, ChannelParams, NoiseAction};
pub use pattern::NoisePattern;
