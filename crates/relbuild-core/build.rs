// Re-export the compile-time target triple so `TargetDescriptor::host()` can
// default to the platform relbuild itself was built for.

fn main() {
    let target = std::env::var("TARGET").unwrap_or_else(|_| "unknown".to_string());
    println!("cargo:rustc-env=RELBUILD_HOST_TARGET={target}");
    println!("cargo:rerun-if-changed=build.rs");
}
