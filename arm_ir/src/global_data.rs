use vec1::Vec1;

/// Initializer of a global or function-local data item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GlobalData {
    Word(i32),
    Words(Vec1<i32>),
    /// Zero-filled region of the given byte size.
    Space(u32),
}

impl std::fmt::Display for GlobalData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GlobalData::Word(x) => write!(f, "\t.word\t{x}"),
            GlobalData::Words(xs) => {
                write!(f, "\t.word\t{}", xs.first())?;
                for x in xs.iter().skip(1) {
                    write!(f, ", {x}")?;
                }
                Ok(())
            }
            GlobalData::Space(n) => write!(f, "\t.space\t{n}"),
        }
    }
}
