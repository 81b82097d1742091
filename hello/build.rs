use std::env;

fn main() {
    // The plugin glue resolves the exported entry points from the executable.
    if env::var_os("CARGO_FEATURE_LIBUWSGI").is_some() {
        println!("cargo:rustc-link-arg-bins=-rdynamic");
    }
}
