/// Builds a `wa.me` click-to-chat link with a prefilled message.
///
/// Phones are expected in international form; everything but digits is dropped.
pub fn click_to_chat_url(phone: &str, message: &str) -> Option<String> {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() < 6 {
        return None;
    }
    Some(format!(
        "https://wa.me/{}?text={}",
        digits,
        urlencoding::encode(message)
    ))
}
