//! Fixed-capacity collections usable before the heap exists

mod ring;

pub use ring::BoundedRing;
