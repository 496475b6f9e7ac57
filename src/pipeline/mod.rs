//! Pipeline stages for document-to-JSON extraction.
//!
//! Each submodule implements one transformation step so it can be tested
//! on its own and swapped without touching its neighbours.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ classify ──▶ render ──▶ encode ──▶ request ──▶ model ──▶ recover
//! (files)   (budget)     (pdfium)   (base64)   (messages)            (JSON)
//! ```
//!
//! 1. [`input`]    — uploaded files, media-type allow-list and size limits
//! 2. [`classify`] — route images and PDFs, enforce the page budget, keep order
//! 3. [`render`]   — rasterise PDF pages; runs in `spawn_blocking` because
//!    pdfium is not async-safe
//! 4. [`encode`]   — JPEG-encode rendered pages and base64-wrap every image
//! 5. [`request`]  — one instruction segment followed by the ordered images
//! 6. [`recover`]  — pure local stages turning model text into valid JSON

pub mod classify;
pub mod encode;
pub mod input;
pub mod recover;
pub mod render;
pub mod request;
