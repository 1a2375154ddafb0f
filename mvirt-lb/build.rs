fn main() -> Result<(), Box<dyn std::error::Error>> {
    // lb.proto: remote load balancer provider (topology fetch + mutations)
    tonic_build::configure()
        .build_server(false) // Client only
        .build_client(true)
        .compile_protos(&["proto/lb.proto"], &["proto"])?;
    Ok(())
}
