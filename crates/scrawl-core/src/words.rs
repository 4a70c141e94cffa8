//! Themed word lists, masking, and hint reveals.

use rand::Rng;
use rand::seq::SliceRandom;

/// Placeholder for unrevealed letters in a masked word.
pub const MASK_CHAR: char = '_';

pub const DEFAULT_THEME: &str = "general";

const GENERAL: &[&str] = &[
    "apple", "bridge", "candle", "dragon", "engine", "forest", "guitar", "hammer",
    "island", "jacket", "kettle", "ladder", "mirror", "needle", "ocean", "pirate",
    "queen", "rocket", "sailor", "tunnel", "umbrella", "violin", "window", "zipper",
    "anchor", "basket", "castle", "desert", "feather", "garden", "helmet", "igloo",
    "jungle", "kite", "lantern", "mountain", "notebook", "orchestra", "pyramid", "rainbow",
    "scissors", "telescope", "unicorn", "volcano", "whistle", "xylophone", "yacht", "zebra",
];

const ANIMALS: &[&str] = &[
    "alligator", "badger", "camel", "dolphin", "elephant", "flamingo", "giraffe", "hedgehog",
    "iguana", "jellyfish", "kangaroo", "lobster", "meerkat", "narwhal", "octopus", "penguin",
    "quail", "raccoon", "squirrel", "toucan", "urchin", "vulture", "walrus", "yak",
    "beaver", "cheetah", "donkey", "eagle", "ferret", "gorilla", "hamster", "koala",
    "lemur", "mole", "newt", "otter", "parrot", "rabbit", "seal", "tortoise",
    "weasel", "wolf", "sloth", "panda", "moose", "lynx", "heron", "crab",
];

const FOOD: &[&str] = &[
    "avocado", "bagel", "carrot", "dumpling", "eggplant", "falafel", "grapefruit", "honey",
    "icecream", "jam", "kebab", "lasagna", "mushroom", "noodles", "omelette", "pancake",
    "quiche", "radish", "sandwich", "taco", "udon", "vanilla", "waffle", "yogurt",
    "broccoli", "cheese", "donut", "espresso", "fondue", "garlic", "hummus", "ketchup",
    "lemonade", "meatball", "nougat", "olive", "pretzel", "risotto", "sushi", "toast",
    "walnut", "zucchini", "burrito", "croissant", "gingerbread", "mango", "popcorn", "salsa",
];

const OBJECTS: &[&str] = &[
    "backpack", "binoculars", "calculator", "compass", "doorbell", "envelope", "flashlight", "globe",
    "headphones", "hourglass", "keyboard", "magnet", "microscope", "padlock", "paperclip", "pencil",
    "printer", "remote", "scooter", "stapler", "suitcase", "thermometer", "toothbrush", "tripod",
    "wallet", "wheelbarrow", "wrench", "abacus", "blender", "camera", "drone", "easel",
    "funnel", "hairbrush", "joystick", "ladle", "megaphone", "mousetrap", "perfume", "pliers",
    "satchel", "skateboard", "snorkel", "spatula", "stopwatch", "teapot", "tweezers", "vacuum",
];

/// Available theme names, in listing order.
pub const THEMES: &[&str] = &["general", "animals", "food", "objects"];

/// The word list for a theme; unknown themes fall back to `general`.
pub fn theme_words(theme: &str) -> &'static [&'static str] {
    match theme {
        "animals" => ANIMALS,
        "food" => FOOD,
        "objects" => OBJECTS,
        _ => GENERAL,
    }
}

/// Pick `n` distinct random words from a theme.
pub fn pick_words<R: Rng + ?Sized>(rng: &mut R, theme: &str, n: usize) -> Vec<String> {
    let list = theme_words(theme);
    let mut indices: Vec<usize> = (0..list.len()).collect();
    indices.shuffle(rng);
    indices
        .into_iter()
        .take(n.min(list.len()))
        .map(|i| list[i].to_string())
        .collect()
}

/// Mask a word: letters become the placeholder, everything else (spaces,
/// hyphens, digits) stays visible.
pub fn mask(word: &str) -> String {
    word.chars()
        .map(|c| if c.is_alphabetic() { MASK_CHAR } else { c })
        .collect()
}

/// Reveal one random still-masked letter. Returns the new masked word, or
/// `None` when nothing is left to reveal.
pub fn reveal_one<R: Rng + ?Sized>(rng: &mut R, masked: &str, word: &str) -> Option<String> {
    let word_chars: Vec<char> = word.chars().collect();
    let mut masked_chars: Vec<char> = masked.chars().collect();
    let hidden: Vec<usize> = masked_chars
        .iter()
        .enumerate()
        .filter(|(_, c)| **c == MASK_CHAR)
        .map(|(i, _)| i)
        .collect();
    if hidden.is_empty() || masked_chars.len() != word_chars.len() {
        return None;
    }
    let pos = hidden[rng.random_range(0..hidden.len())];
    masked_chars[pos] = word_chars[pos];
    Some(masked_chars.into_iter().collect())
}

/// Whether a hint is due at this remaining time: a positive multiple of the
/// hint interval, strictly below `draw_time - 10`.
pub fn hint_due(time_left: u32, draw_time: u32) -> bool {
    time_left > 0
        && time_left % crate::room::HINT_INTERVAL_SECS == 0
        && time_left < draw_time.saturating_sub(10)
}
