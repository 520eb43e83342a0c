//! Generates the kubelet device plugin bindings

fn main() -> Result<(), Box<dyn std::error::Error>> {
    println!("cargo:rerun-if-changed=proto/deviceplugin/v1beta1/api.proto");

    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .type_attribute(".", "#[allow(missing_docs)]")
        .compile(&["proto/deviceplugin/v1beta1/api.proto"], &["proto"])?;

    Ok(())
}
