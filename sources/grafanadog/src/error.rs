use snafu::Snafu;
use std::io;
use std::path::PathBuf;
use url::Url;

/// Potential errors while converging the managed service
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Failed to read config file {}: {}", path.display(), source))]
    ConfigRead { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to parse config file {}: {}", path.display(), source))]
    ConfigParse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[snafu(display("Failed to read data-source announcements from {}: {}", path.display(), source))]
    SourcesRead { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to parse data-source announcements in {}: {}", path.display(), source))]
    SourcesParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Data-source announcements in {} must be a JSON array", path.display()))]
    SourcesFormat { path: PathBuf },

    #[snafu(display("Admin secret unconfirmed, peer store {} failed: {}", action, source))]
    SecretUnconfirmed {
        action: &'static str,
        source: peerstore::Error,
    },

    #[snafu(display("Admin secret unconfirmed, peer store did not return the value just written"))]
    SecretReadBack,

    #[snafu(display("Failed to register template '{}': {}", template, source))]
    TemplateRegister {
        template: &'static str,
        #[snafu(source(from(handlebars::TemplateError, Box::new)))]
        source: Box<handlebars::TemplateError>,
    },

    #[snafu(display("Failed to render template '{}': {}", template, source))]
    TemplateRender {
        template: &'static str,
        #[snafu(source(from(handlebars::RenderError, Box::new)))]
        source: Box<handlebars::RenderError>,
    },

    #[snafu(display("Failed to serialize {} as YAML: {}", what, source))]
    SerializeYaml {
        what: &'static str,
        source: serde_yaml::Error,
    },

    #[snafu(display("Failed to serialize {} as JSON: {}", what, source))]
    SerializeJson {
        what: &'static str,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to create directory '{}': {}", path.display(), source))]
    Mkdir { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to create temporary file in '{}': {}", path.display(), source))]
    CreateTempfile { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to write '{}': {}", path.display(), source))]
    FileWrite { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to move new file into place at '{}': {}", path.display(), source))]
    FilePersist {
        path: PathBuf,
        source: tempfile::PersistError,
    },

    #[snafu(display("Failed to read '{}': {}", path.display(), source))]
    FileRead { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to delete '{}': {}", path.display(), source))]
    FileDelete { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to move '{}' to '{}': {}", from.display(), to.display(), source))]
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    #[snafu(display("Failed to list directory '{}': {}", path.display(), source))]
    ListDirectory { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to set permissions on '{}': {}", path.display(), source))]
    Permissions { path: PathBuf, source: io::Error },

    #[snafu(display("Failed to parse controller state in {}: {}", path.display(), source))]
    StateParse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[snafu(display("Failed to run '{}': {}", command, source))]
    CommandSpawn { command: String, source: io::Error },

    #[snafu(display("Failed waiting for '{}': {}", command, source))]
    CommandWait { command: String, source: io::Error },

    #[snafu(display("'{}' did not finish within {} seconds", command, seconds))]
    CommandTimeout { command: String, seconds: u64 },

    #[snafu(display("'{}' failed: {}", command, stderr))]
    CommandFailed { command: String, stderr: String },

    #[snafu(display("Unsupported architecture: {}", arch))]
    UnsupportedArch { arch: String },

    #[snafu(display("Failed to look up {} '{}': {}", kind, name, source))]
    LookupAccount {
        kind: &'static str,
        name: String,
        source: nix::Error,
    },

    #[snafu(display("{} '{}' does not exist", kind, name))]
    MissingAccount { kind: &'static str, name: String },

    #[snafu(display("Failed to change ownership of '{}': {}", path.display(), source))]
    Chown { path: PathBuf, source: nix::Error },

    #[snafu(display("Failed to walk '{}': {}", path.display(), source))]
    Walk {
        path: PathBuf,
        source: walkdir::Error,
    },

    #[snafu(display("Failed to unpack '{}': {}", url, source))]
    Unpack { url: String, source: io::Error },

    #[snafu(display("Release archive from '{}' did not contain '{}'", url, path.display()))]
    ExtractedMissing { url: String, path: PathBuf },

    #[snafu(display("Unable to parse URL {}: {}", url, source))]
    UrlParse {
        url: String,
        source: url::ParseError,
    },

    #[snafu(display("Error building HTTP client for {}: {}", url.as_str(), source))]
    HttpClient { url: Url, source: reqwest::Error },

    #[snafu(display("Error sending HTTP request to {}: {}", url.as_str(), source))]
    HttpSend { url: Url, source: reqwest::Error },

    #[snafu(display("Error receiving HTTP response {}: {}", url.as_str(), source))]
    HttpResponse { url: Url, source: reqwest::Error },

    #[snafu(display("Error downloading {} to disk: {}", url.as_str(), source))]
    HttpBody { url: Url, source: reqwest::Error },

    #[snafu(display("Unable to parse JSON response from {}: {}", url.as_str(), source))]
    HttpJson { url: Url, source: reqwest::Error },
}

impl Error {
    /// Whether this is a transient coordination failure: the secret couldn't be confirmed in
    /// the peer store, and retrying on a later event is expected to succeed.
    pub fn is_secret_unconfirmed(&self) -> bool {
        matches!(
            self,
            Error::SecretUnconfirmed { .. } | Error::SecretReadBack
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
