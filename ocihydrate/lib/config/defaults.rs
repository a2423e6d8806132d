//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The default endpoint for acquiring bearer tokens.
pub const DEFAULT_AUTH_URL: &str = "https://auth.docker.io";

/// The default base URL of the Registry HTTP API v2.
pub const DEFAULT_REGISTRY_URL: &str = "https://registry.hub.docker.com";

/// The default service name used during token authentication.
pub const DEFAULT_AUTH_SERVICE: &str = "registry.docker.io";

/// The default tag pulled when none is given.
pub const DEFAULT_IMAGE_TAG: &str = "latest";

/// The default number of retries for transient HTTP failures. Pulls fail fast unless raised.
pub const DEFAULT_MAX_RETRIES: u32 = 0;

/// The default number of layer downloads allowed in flight at once.
pub const DEFAULT_DOWNLOAD_CONCURRENCY: usize = 4;

/// Environment variable overriding [`DEFAULT_AUTH_URL`].
pub const AUTH_URL_ENV_VAR: &str = "OCIHYDRATE_AUTH_URL";

/// Environment variable overriding [`DEFAULT_REGISTRY_URL`].
pub const REGISTRY_URL_ENV_VAR: &str = "OCIHYDRATE_REGISTRY_URL";

/// Environment variable overriding [`DEFAULT_AUTH_SERVICE`].
pub const AUTH_SERVICE_ENV_VAR: &str = "OCIHYDRATE_AUTH_SERVICE";

/// Environment variable overriding [`DEFAULT_MAX_RETRIES`].
pub const MAX_RETRIES_ENV_VAR: &str = "OCIHYDRATE_MAX_RETRIES";

/// Environment variable overriding [`DEFAULT_DOWNLOAD_CONCURRENCY`].
pub const CONCURRENCY_ENV_VAR: &str = "OCIHYDRATE_CONCURRENCY";
