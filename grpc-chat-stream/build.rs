use tonic_build::manual::{Builder, Method, Service};

fn main() {
    // Messages are plain prost structs in `src/message.rs`; only the service
    // plumbing is generated, so no protoc is needed.
    println!("cargo:rerun-if-changed=build.rs");

    let chat = Method::builder()
        .name("chat")
        .route_name("Chat")
        .input_type("crate::message::ChatMessage")
        .output_type("crate::message::ChatMessage")
        .codec_path("tonic::codec::ProstCodec")
        .client_streaming()
        .server_streaming()
        .build();

    let service = Service::builder()
        .name("ChatService")
        .package("stream")
        .method(chat)
        .build();

    Builder::new().compile(&[service]);
}
