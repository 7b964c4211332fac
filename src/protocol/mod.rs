pub mod openai_chat;
pub mod zai;
