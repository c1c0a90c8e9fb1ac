//! Cipher-suite selection, minimum-version enforcement, and security
//! grading for TLS contexts used by the HSM transport and any caller-facing
//! endpoint.
//!
//! Grounded on `rustls`'s own `SupportedCipherSuite` concept (suite name,
//! protocol version, forward-secrecy flag) and assembled as a small builder
//! that validates a requested security level against a static table of
//! allowed suites, the way an HTTP client builder assembles a `ClientBuilder`
//! from a config struct.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The overall strictness profile a deployment selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// TLS 1.3 only, most restrictive suite list.
    Maximum,
    /// TLS 1.3 only, slightly broader suite list.
    High,
    /// TLS 1.2 minimum.
    Medium,
    /// TLS 1.2 minimum, broadest suite list, for legacy interoperability.
    Compatible,
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Maximum => "maximum",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Compatible => "compatible",
        };
        write!(f, "{s}")
    }
}

/// One TLS 1.2/1.3 cipher suite this core knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSuiteInfo {
    /// IANA suite name.
    pub name: &'static str,
    /// TLS protocol version this suite belongs to.
    pub protocol_version: &'static str,
    /// Whether this suite provides perfect forward secrecy.
    pub forward_secrecy: bool,
}

const TLS13_SUITES: &[CipherSuiteInfo] = &[
    CipherSuiteInfo {
        name: "TLS_AES_256_GCM_SHA384",
        protocol_version: "1.3",
        forward_secrecy: true,
    },
    CipherSuiteInfo {
        name: "TLS_CHACHA20_POLY1305_SHA256",
        protocol_version: "1.3",
        forward_secrecy: true,
    },
    CipherSuiteInfo {
        name: "TLS_AES_128_GCM_SHA256",
        protocol_version: "1.3",
        forward_secrecy: true,
    },
];

const TLS12_SUITES: &[CipherSuiteInfo] = &[
    CipherSuiteInfo {
        name: "TLS_ECDHE_ECDSA_WITH_AES_256_GCM_SHA384",
        protocol_version: "1.2",
        forward_secrecy: true,
    },
    CipherSuiteInfo {
        name: "TLS_ECDHE_RSA_WITH_AES_256_GCM_SHA384",
        protocol_version: "1.2",
        forward_secrecy: true,
    },
    CipherSuiteInfo {
        name: "TLS_ECDHE_RSA_WITH_CHACHA20_POLY1305_SHA256",
        protocol_version: "1.2",
        forward_secrecy: true,
    },
];

impl SecurityLevel {
    /// Relative strictness, most restrictive first, for comparing two levels
    /// (e.g. a migration target must rank at least as high as its source).
    /// Declaration order alone cannot be relied on for this: a derived `Ord`
    /// would treat `Maximum` as the *smallest* variant, the opposite of what
    /// "at least as secure" means here.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Maximum => 4,
            Self::High => 3,
            Self::Medium => 2,
            Self::Compatible => 1,
        }
    }

    /// Minimum TLS protocol version this level permits.
    #[must_use]
    pub const fn min_tls_version(self) -> &'static str {
        match self {
            Self::Maximum | Self::High => "1.3",
            Self::Medium | Self::Compatible => "1.2",
        }
    }

    /// Cipher suites permitted at this level, every one of them PFS-capable.
    #[must_use]
    pub fn allowed_suites(self) -> Vec<CipherSuiteInfo> {
        match self {
            Self::Maximum => TLS13_SUITES.to_vec(),
            Self::High => TLS13_SUITES.to_vec(),
            Self::Medium | Self::Compatible => {
                let mut suites = TLS13_SUITES.to_vec();
                suites.extend_from_slice(TLS12_SUITES);
                suites
            }
        }
    }
}

impl std::str::FromStr for SecurityLevel {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "maximum" => Ok(Self::Maximum),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "compatible" | "compatibility" => Ok(Self::Compatible),
            other => Err(Error::invalid_input(format!("unknown security level: {other}"))),
        }
    }
}

/// A+ through F, assigned by [`TlsContextBuilder::build`] from the selected
/// security level and the suites that actually survive PFS filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityGrade {
    /// Best possible: TLS 1.3 only, all suites PFS-capable.
    APlus,
    /// TLS 1.3 available, minor relaxations.
    A,
    /// TLS 1.2 minimum with PFS enforced throughout.
    B,
    /// TLS 1.2 minimum, at least one non-PFS suite tolerated.
    C,
    /// Below the `Compatible` floor; should not be used.
    F,
}

impl fmt::Display for SecurityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::APlus => "A+",
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::F => "F",
        };
        write!(f, "{s}")
    }
}

/// A validated TLS configuration ready to hand to a `rustls` builder.
#[derive(Debug, Clone)]
pub struct TlsContext {
    /// The security level this context was built for.
    pub security_level: SecurityLevel,
    /// Minimum protocol version enforced.
    pub min_version: &'static str,
    /// The suites selected, all PFS-capable by construction.
    pub suites: Vec<CipherSuiteInfo>,
    /// The computed security grade.
    pub grade: SecurityGrade,
}

/// Builds a [`TlsContext`] for a requested [`SecurityLevel`], rejecting any
/// suite lacking perfect forward secrecy.
#[derive(Debug, Default)]
pub struct TlsContextBuilder {
    security_level: SecurityLevel,
}

impl Default for SecurityLevel {
    fn default() -> Self {
        Self::High
    }
}

impl TlsContextBuilder {
    /// Start a builder at the default (`High`) security level.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the security level to build for.
    #[must_use]
    pub const fn with_security_level(mut self, level: SecurityLevel) -> Self {
        self.security_level = level;
        self
    }

    /// Build the context, filtering out any suite lacking PFS and grading
    /// the result.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyViolation`] if, after filtering, no suites
    /// remain for the requested level (a misconfigured suite table, since
    /// every built-in suite here is PFS-capable).
    pub fn build(&self) -> Result<TlsContext> {
        let suites: Vec<CipherSuiteInfo> = self
            .security_level
            .allowed_suites()
            .into_iter()
            .filter(|s| s.forward_secrecy)
            .collect();

        if suites.is_empty() {
            return Err(Error::policy_violation(
                "no PFS-capable cipher suites available for requested security level",
            ));
        }

        let grade = Self::grade(self.security_level, &suites);

        Ok(TlsContext {
            security_level: self.security_level,
            min_version: self.security_level.min_tls_version(),
            suites,
            grade,
        })
    }

    fn grade(level: SecurityLevel, suites: &[CipherSuiteInfo]) -> SecurityGrade {
        let all_pfs = suites.iter().all(|s| s.forward_secrecy);
        let only_tls13 = suites.iter().all(|s| s.protocol_version == "1.3");

        match (level, only_tls13, all_pfs) {
            (SecurityLevel::Maximum, true, true) => SecurityGrade::APlus,
            (SecurityLevel::High, true, true) => SecurityGrade::A,
            (SecurityLevel::Medium, _, true) => SecurityGrade::B,
            (SecurityLevel::Compatible, _, true) => SecurityGrade::C,
            _ => SecurityGrade::F,
        }
    }
}
