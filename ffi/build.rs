use std::env;

fn main() {
    println!("cargo:rerun-if-env-changed=UWSGI_LIB_DIR");

    if env::var_os("CARGO_FEATURE_LINK").is_none() {
        return;
    }

    if let Ok(dir) = env::var("UWSGI_LIB_DIR") {
        println!("cargo:rustc-link-search=native={dir}");
    }
    println!("cargo:rustc-link-lib=dylib=uwsgi");
}
