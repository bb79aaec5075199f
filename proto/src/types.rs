#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Empty {}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Block {
    #[prost(uint64, tag = "1")]
    pub index: u64,
    #[prost(int64, tag = "2")]
    pub timestamp: i64,
    #[prost(bytes = "vec", tag = "3")]
    pub previous_block_hash: ::prost::alloc::vec::Vec<u8>,
    #[prost(string, tag = "4")]
    pub data: ::prost::alloc::string::String,
    #[prost(uint64, tag = "5")]
    pub difficulty: u64,
    #[prost(uint64, tag = "6")]
    pub nonce: u64,
    #[prost(bytes = "vec", tag = "7")]
    pub hash: ::prost::alloc::vec::Vec<u8>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct BlockChain {
    #[prost(message, repeated, tag = "1")]
    pub blocks: ::prost::alloc::vec::Vec<Block>,
}
