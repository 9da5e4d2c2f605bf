/// Canonical form of a game name for catalog queries and match comparison.
///
/// Collapses whitespace runs to a single space, trims both ends and lowercases.
/// Both sides of any name comparison must go through this function.
pub fn normalize(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}
