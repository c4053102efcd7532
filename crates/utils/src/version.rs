use std::sync::LazyLock;

/// Defines the application version.
pub static VERSION: LazyLock<String> =
    LazyLock::new(|| format_version(env!("IMAGE_VERSION"), env!("CARGO_PKG_VERSION")));

fn format_version(image_version: &str, crate_version: &str) -> String {
    if image_version == crate_version {
        image_version.to_string()
    } else {
        format!("{image_version}-{crate_version}")
    }
}
