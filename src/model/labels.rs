use std::fmt;

use serde::Serialize;

/// Number of classes the classifier was trained on.
pub const GENRE_COUNT: usize = 9;

/// Genre vocabulary, in the order of the model's output vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum Genre {
    Blues,
    Classical,
    Jazz,
    Metal,
    Pop,
    Rap,
    Rock,
    RnB,
    TechnoElectronic,
}

impl Genre {
    pub const ALL: [Genre; GENRE_COUNT] = [
        Genre::Blues,
        Genre::Classical,
        Genre::Jazz,
        Genre::Metal,
        Genre::Pop,
        Genre::Rap,
        Genre::Rock,
        Genre::RnB,
        Genre::TechnoElectronic,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Genre::Blues => "Blues",
            Genre::Classical => "Classical",
            Genre::Jazz => "Jazz",
            Genre::Metal => "Metal",
            Genre::Pop => "Pop",
            Genre::Rap => "Rap",
            Genre::Rock => "Rock",
            Genre::RnB => "R&B",
            Genre::TechnoElectronic => "Techno/Electronic",
        }
    }

    /// Three-letter code used by the web client.
    pub fn code(self) -> &'static str {
        match self {
            Genre::Blues => "BLS",
            Genre::Classical => "CLA",
            Genre::Jazz => "JZZ",
            Genre::Metal => "MTL",
            Genre::Pop => "POP",
            Genre::Rap => "RAP",
            Genre::Rock => "RCK",
            Genre::RnB => "R&B",
            Genre::TechnoElectronic => "TEC",
        }
    }
}

impl fmt::Display for Genre {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Display names in output order.
pub fn label_names() -> Vec<&'static str> {
    Genre::ALL.iter().map(|g| g.name()).collect()
}
