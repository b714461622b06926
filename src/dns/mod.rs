//! DNS-side checks
//!
//! * `probe` - single-question lookups with retry against one nameserver
//! * `matrix` - domain × nameserver test matrix and its verdict
//! * `corefile` - Corefile directive detection and insertion
//! * `resolv_conf` - local resolver configuration
//! * `log_scan` - error keyword scan over backend logs

/// Single-question DNS probes
pub mod probe;

/// Domain × nameserver resolution matrix
pub mod matrix;

/// Corefile inspection and patching
pub mod corefile;

/// resolv.conf parsing
pub mod resolv_conf;

/// Backend log analysis
pub mod log_scan;
