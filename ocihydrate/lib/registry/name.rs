use std::{fmt, str::FromStr};

use getset::Getters;

use crate::HydrateError;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An image repository name of the form `org/name`, e.g. `cloudfoundry/windows2016fs`.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct ImageName {
    /// The organization (namespace) part.
    org: String,

    /// The image part.
    name: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ImageName {
    /// Returns the full repository path used in registry URLs and token scopes.
    pub fn repository(&self) -> String {
        format!("{}/{}", self.org, self.name)
    }

    /// Returns the file name of the portable archive produced for this image at `tag`.
    ///
    /// ## Examples
    ///
    /// ```
    /// use ocihydrate::registry::ImageName;
    ///
    /// let image: ImageName = "cloudfoundry/windows2016fs".parse().unwrap();
    /// assert_eq!(image.archive_file_name("1803"), "windows2016fs-1803.tgz");
    /// ```
    pub fn archive_file_name(&self, tag: &str) -> String {
        format!("{}-{}.tgz", self.name, tag)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl FromStr for ImageName {
    type Err = HydrateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(HydrateError::InvalidImageName(
                "no image name provided".to_string(),
            ));
        }

        let parts: Vec<&str> = s.split('/').collect();
        match parts.as_slice() {
            [org, name] if !org.is_empty() && !name.is_empty() => Ok(Self {
                org: org.to_string(),
                name: name.to_string(),
            }),
            _ => Err(HydrateError::InvalidImageName(format!(
                "{s:?} is not of the form org/name"
            ))),
        }
    }
}

impl fmt::Display for ImageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.org, self.name)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
