fn main() {
    tonic_prost_build::configure()
        .out_dir("../../proto/gen")
        .compile_protos(&["../../proto/fetcher.proto"], &["../../proto/"])
        .expect("Failed to compile fetcher protobuf protocol file");
}
