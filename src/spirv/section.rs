use super::ops::Op;

// An independently accumulated buffer of 32-bit words. The final module is
// the concatenation of all sections in the order the format prescribes.
#[derive(Clone, Debug, Default)]
pub struct Section {
    words: Vec<u32>,
}

// A string literal is encoded as its UTF-8 bytes plus a terminating NUL,
// packed little-endian into words.
pub fn string_words(s: &str) -> Vec<u32> {
    let mut bytes = s.as_bytes().to_vec();
    bytes.push(0);
    while bytes.len() % 4 != 0 {
        bytes.push(0);
    }
    bytes.chunks(4)
        .map(|c| {
            u32::from(c[0])
                | u32::from(c[1]) << 8
                | u32::from(c[2]) << 16
                | u32::from(c[3]) << 24
        })
        .collect()
}

impl Section {
    pub fn new() -> Section {
        Section::default()
    }

    pub fn append_raw(&mut self, word: u32) {
        self.words.push(word);
    }

    // Word 0 of every instruction packs the opcode in the low half-word and
    // the total word count, including word 0 itself, in the high half-word.
    pub fn append(&mut self, op: Op, operands: &[u32]) {
        let word_count = (operands.len() + 1) as u32;
        self.words.push((word_count << 16) | op as u32);
        self.words.extend_from_slice(operands);
    }

    pub fn append_with_string(
        &mut self,
        op: Op,
        pre: &[u32],
        s: &str,
        post: &[u32]
    ) {
        let string = string_words(s);
        let word_count = (pre.len() + string.len() + post.len() + 1) as u32;
        self.words.push((word_count << 16) | op as u32);
        self.words.extend_from_slice(pre);
        self.words.extend_from_slice(&string);
        self.words.extend_from_slice(post);
    }

    pub fn words(&self) -> &[u32] {
        &self.words
    }

    pub fn extend(&mut self, other: &Section) {
        self.words.extend_from_slice(other.words());
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn instruction_word_packing() {
        let mut s = Section::new();
        s.append(Op::Capability, &[1]);
        assert_eq!(s.words(), &[(2 << 16) | 17, 1]);
    }

    #[test]
    fn zero_operand_instruction() {
        let mut s = Section::new();
        s.append(Op::Return, &[]);
        assert_eq!(s.words(), &[(1 << 16) | 253]);
    }

    #[test]
    fn string_encoding_nul_terminated() {
        // "main" fills a word, so the terminator needs one more.
        let words = string_words("main");
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], u32::from_le_bytes(*b"main"));
        assert_eq!(words[1], 0);
    }

    #[test]
    fn string_encoding_partial_word() {
        let words = string_words("abc");
        assert_eq!(words, vec![u32::from_le_bytes([b'a', b'b', b'c', 0])]);
    }

    #[test]
    fn string_instruction_word_count() {
        let mut s = Section::new();
        s.append_with_string(Op::Name, &[4], "abc", &[]);
        assert_eq!(s.words()[0], (3 << 16) | 5);
        assert_eq!(s.words()[1], 4);
    }
}
