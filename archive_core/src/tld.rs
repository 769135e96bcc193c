// Copyright 2021 Toolchain Labs, Inc. All rights reserved.
// Licensed under the Apache License, Version 2.0 (see LICENSE).

//! Derives the effective top-level domain and "TLD+1" label from a queried DNS name,
//! the way `toMongoData` derives `TLD`/`TLDPlusOne` from the public suffix list.

/// A classifier over the public suffix rule set, bundled into the binary at compile time
/// (no network fetch, no runtime data file). Stateless; cheap to construct and to clone.
#[derive(Clone, Copy, Debug, Default)]
pub struct TldClassifier;

/// Derived classification of a domain name. Failure to classify (malformed name, bare
/// TLD with no registrable label) yields empty strings rather than an error, matching the
/// specification's "never an error" rule for this derivation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TldParts {
    pub tld: String,
    pub tld_plus_one: String,
}

impl TldClassifier {
    pub fn new() -> Self {
        TldClassifier
    }

    pub fn classify(&self, name: &str) -> TldParts {
        let trimmed = name.trim_end_matches('.');
        if trimmed.is_empty() {
            return TldParts::default();
        }

        let domain_bytes = trimmed.as_bytes();

        let tld = psl::suffix(domain_bytes)
            .map(|s| String::from_utf8_lossy(s.as_bytes()).into_owned())
            .unwrap_or_default();

        let tld_plus_one = psl::domain(domain_bytes)
            .map(|d| String::from_utf8_lossy(d.as_bytes()).into_owned())
            .unwrap_or_default();

        TldParts { tld, tld_plus_one }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_simple_two_label_domain() {
        let classifier = TldClassifier::new();
        let parts = classifier.classify("www.example.com");
        assert_eq!(parts.tld, "com");
        assert_eq!(parts.tld_plus_one, "example.com");
    }

    #[test]
    fn classifies_multi_label_public_suffix() {
        let classifier = TldClassifier::new();
        let parts = classifier.classify("www.example.co.uk");
        assert_eq!(parts.tld, "co.uk");
        assert_eq!(parts.tld_plus_one, "example.co.uk");
    }

    #[test]
    fn empty_name_yields_empty_parts() {
        let classifier = TldClassifier::new();
        assert_eq!(classifier.classify(""), TldParts::default());
    }
}
