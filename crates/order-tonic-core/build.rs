/// Builds the gRPC client and server code for `order.proto` using
/// `tonic-prost-build`.
///
/// The generated bindings land in the crate's `OUT_DIR` together with an
/// encoded file descriptor set (`order_descriptor.bin`) that the server hands
/// to `tonic-reflection`.
///
/// # Well-known types
///
/// `google.protobuf.StringValue` is mapped by prost to a plain `String`, so
/// unary requests and responses that carry a single scalar show up in the
/// generated traits as `tonic::Request<String>` / `tonic::Response<String>`.
/// The descriptor set still includes `wrappers.proto` so reflection clients
/// can resolve it.
///
/// # Panics
///
/// Panics if code generation fails (for example, `protoc` is missing).
use std::env;
use std::path::PathBuf;
fn main() {
    let out_dir = PathBuf::from(env::var("OUT_DIR").unwrap());
    let descriptor_path = out_dir.join("order_descriptor.bin");

    let mut config = tonic_prost_build::Config::new();
    config.file_descriptor_set_path(&descriptor_path);

    println!("cargo:rerun-if-changed=proto/order.proto");

    tonic_prost_build::configure()
        .compile_with_config(config, &["proto/order.proto"], &["proto"])
        .unwrap();
}
