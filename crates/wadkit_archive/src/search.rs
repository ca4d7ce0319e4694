//! Entry search queries

use bon::Builder;
use glob::{MatchOptions, Pattern};

use crate::{
    dir::DirId,
    entry::{split_extension, Entry},
    error::Result,
};

/// Filters for [`crate::archive::Archive::find_all`] and friends
///
/// ```
/// use wadkit_archive::search::SearchOptions;
///
/// let options = SearchOptions::builder()
///     .match_name("TROO*")
///     .match_namespace("sprites")
///     .build();
/// assert!(!options.search_subdirs);
/// ```
#[derive(Debug, Clone, Default, Builder)]
pub struct SearchOptions {
    /// Case-insensitive glob the entry name must match
    #[builder(into)]
    pub match_name: Option<String>,

    /// Type id the entry must have
    #[builder(into)]
    pub match_type: Option<String>,

    /// Namespace the entry must be in
    #[builder(into)]
    pub match_namespace: Option<String>,

    /// Directory to search instead of the root (ignored by flat archives)
    pub dir: Option<DirId>,

    /// Whether to descend into subdirectories
    #[builder(default)]
    pub search_subdirs: bool,

    /// Compare the name glob against the full name instead of the name minus its extension
    #[builder(default)]
    pub respect_extension: bool,
}

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: false,
    require_literal_separator: false,
    require_literal_leading_dot: false,
};

/// Compiled form of the entry-level filters of a [`SearchOptions`]
#[derive(Debug)]
pub(crate) struct Matcher {
    name: Option<(Pattern, bool)>,
    kind: Option<String>,
}

impl Matcher {
    pub fn new(options: &SearchOptions) -> Result<Self> {
        let name = options
            .match_name
            .as_deref()
            .map(|glob| -> Result<(Pattern, bool)> {
                let full_name = options.respect_extension || !split_extension(glob).1.is_empty();
                Ok((Pattern::new(glob)?, full_name))
            })
            .transpose()?;

        Ok(Matcher {
            name,
            kind: options.match_type.clone(),
        })
    }

    /// Whether `entry` passes the name and type filters
    pub fn matches(&self, entry: &Entry) -> bool {
        let name_ok = self.name.as_ref().map_or(true, |(pattern, full_name)| {
            let candidate = if *full_name {
                entry.name()
            } else {
                entry.name_no_ext()
            };
            pattern.matches_with(candidate, MATCH_OPTIONS)
        });
        let kind_ok = self
            .kind
            .as_deref()
            .map_or(true, |kind| entry.kind().eq_ignore_ascii_case(kind));
        name_ok && kind_ok
    }
}
