use std::env;

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Models are loaded at runtime from the paths in the environment; only
    // report which execution providers this build can register.
    let mut enabled_features = Vec::new();

    if env::var("CARGO_FEATURE_CUDA").is_ok() {
        enabled_features.push("CUDA");
    }
    if env::var("CARGO_FEATURE_TENSORRT").is_ok() {
        enabled_features.push("TensorRT");
    }
    if env::var("CARGO_FEATURE_DIRECTML").is_ok() {
        enabled_features.push("DirectML");
    }
    if env::var("CARGO_FEATURE_COREML").is_ok() {
        enabled_features.push("CoreML");
    }
    if env::var("CARGO_FEATURE_OPENVINO").is_ok() {
        enabled_features.push("OpenVINO");
    }

    if enabled_features.is_empty() {
        println!("cargo:warning=Building without accelerators: COMPUTE_PROFILE=accelerator will fail at startup");
    } else {
        println!("cargo:warning=Accelerators enabled: {}", enabled_features.join(", "));
    }

    let target = env::var("TARGET").unwrap_or_default();
    if target.contains("windows-gnu") && enabled_features.contains(&"CUDA") {
        println!("cargo:warning=CUDA binaries may not be available for Windows GNU target");
        println!("cargo:warning=Consider using DirectML instead: cargo build --features directml");
    }
}
