//! TLS context construction: cipher-suite selection, version enforcement,
//! and security grading.

pub mod context;

pub use context::{
    CipherSuiteInfo, SecurityGrade, SecurityLevel, TlsContext, TlsContextBuilder,
};
