//! Options controlling how an archive session interprets its input.

/// Per-format options passed to [`Archive::open`](crate::Archive::open).
///
/// Every field has a documented default, so most callers only override the
/// one they care about.
///
/// # Examples
///
/// ```
/// use unarc_core::ArchiveOptions;
///
/// // Defaults: every supported ZIP method, checksums verified
/// let options = ArchiveOptions::default();
/// assert!(!options.zip_deflated_only);
///
/// let strict = ArchiveOptions {
///     zip_deflated_only: true,
///     ..Default::default()
/// };
/// assert!(strict.verify_checksums);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveOptions {
    /// Restrict ZIP payload decoding to the store and deflate methods.
    ///
    /// Entries using any other method still appear during iteration; reading
    /// them fails with `DecompressFailed`.
    pub zip_deflated_only: bool,

    /// Verify stored CRC-32 values.
    ///
    /// Applies to ZIP and RAR payloads once an entry has been read to its end,
    /// and to RAR block headers while parsing.
    pub verify_checksums: bool,
}

impl Default for ArchiveOptions {
    /// Default values:
    /// - `zip_deflated_only`: false
    /// - `verify_checksums`: true
    fn default() -> Self {
        Self {
            zip_deflated_only: false,
            verify_checksums: true,
        }
    }
}

impl ArchiveOptions {
    /// Sets [`zip_deflated_only`](Self::zip_deflated_only).
    #[must_use]
    pub const fn with_zip_deflated_only(mut self, enabled: bool) -> Self {
        self.zip_deflated_only = enabled;
        self
    }

    /// Sets [`verify_checksums`](Self::verify_checksums).
    #[must_use]
    pub const fn with_verify_checksums(mut self, enabled: bool) -> Self {
        self.verify_checksums = enabled;
        self
    }
}
