use blake3::Hasher;
use courier_api::types::{ChatId, UserId};

pub fn direct_chat_id(a: &UserId, b: &UserId) -> ChatId {
    let (left, right) = if a.value <= b.value { (a, b) } else { (b, a) };
    let mut hasher = Hasher::new();
    hasher.update(b"courier:chat:direct:v1");
    hasher.update(left.value.as_bytes());
    hasher.update(&[0]);
    hasher.update(right.value.as_bytes());
    let hash = hasher.finalize();
    ChatId::new(hash.to_hex().to_string())
}
