//! Pipeline stages for turning uploads into PDFs.
//!
//! Each submodule implements one transformation step and knows nothing
//! about jobs, queues or the control task; [`crate::worker`] runs them and
//! [`crate::coordinator`] sequences them.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ read ──▶ decode ──▶ compose ──▶ assemble ──▶ artifact
//!                      │                                    │
//!                      └── PDF: page count, bytes reused ───┘
//!
//! artifacts (ordered) ──▶ merge ──▶ bundle
//! ```
//!
//! 1. [`input`]    accept uploads whose declared media type is supported
//! 2. [`read`]     reassemble the file from bounded chunks
//! 3. [`decode`]   dispatch on media type; TIFF frames go through a
//!    [`surface`] and are re-encoded by [`encode`]
//! 4. [`compose`]  scale each frame to fit its page, centered
//! 5. [`assemble`] write the pages into one PDF
//! 6. [`merge`]    concatenate PDFs page by page, in selection order

pub mod assemble;
pub mod compose;
pub mod decode;
pub mod encode;
pub mod input;
pub mod merge;
pub mod read;
pub mod surface;
