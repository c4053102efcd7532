use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=VERSION");

    let version = env::var("VERSION").unwrap_or_else(|_| "latest".to_string());
    println!("cargo:rustc-env=IMAGE_VERSION={version}");
}
