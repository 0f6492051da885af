// Build script to compile Protocol Buffer definitions

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Client and server stubs for both services: the gateway serves
    // AuthService and calls CategoryService.
    tonic_build::configure()
        .build_server(true)
        .build_client(true)
        .compile_protos(
            &["../../proto/auth.proto", "../../proto/category.proto"],
            &["../../proto/"],
        )?;

    // Tell Cargo to rerun if proto files change
    println!("cargo:rerun-if-changed=../../proto/auth.proto");
    println!("cargo:rerun-if-changed=../../proto/category.proto");

    Ok(())
}
