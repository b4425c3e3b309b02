// Copyright 2022 OpenStax Poland
// Licensed under the MIT license. See LICENSE file in the project root for
// full license text.

/// Declare a fieldless enum of protocol keywords.
///
/// The generated `from_keyword` compares ignoring ASCII case, so the whole
/// lookup table is fixed at compile time.
#[macro_export]
macro_rules! keywords {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $keyword:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq)]
        $vis enum $name {
            $( $(#[$vmeta])* $variant, )+
        }

        impl $name {
            pub const ALL: &'static [$name] = &[$($name::$variant),+];

            /// Keyword as it appears on the wire
            pub fn keyword(self) -> &'static str {
                match self {
                    $( $name::$variant => $keyword, )+
                }
            }

            pub fn from_keyword(word: &[u8]) -> Option<Self> {
                $(
                    if word.eq_ignore_ascii_case($keyword.as_bytes()) {
                        return Some($name::$variant);
                    }
                )+
                None
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str(self.keyword())
            }
        }
    };
}
