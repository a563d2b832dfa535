use crate::protocol::AudioRecord;

/// Library listing plus the selected entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AudioListState {
    pub audios: Vec<AudioRecord>,
    pub current_index: Option<usize>,
    pub is_loading: bool,
}

impl AudioListState {
    pub fn add(&mut self, record: AudioRecord) {
        self.audios.push(record);
    }

    pub fn add_many(&mut self, records: impl IntoIterator<Item = AudioRecord>) {
        self.audios.extend(records);
    }

    /// Removes `id` and keeps `current_index` inside the shortened list.
    pub fn remove(&mut self, id: &str) -> bool {
        let before = self.audios.len();
        self.audios.retain(|record| record.id != id);
        if self.audios.len() == before {
            return false;
        }
        if let Some(index) = self.current_index {
            if index >= self.audios.len() {
                self.current_index = self.audios.len().checked_sub(1);
            }
        }
        true
    }

    /// Out-of-range indices clear the selection.
    pub fn set_current_index(&mut self, index: Option<usize>) {
        self.current_index = index.filter(|index| *index < self.audios.len());
    }

    pub fn set_all(&mut self, records: Vec<AudioRecord>) {
        self.audios = records;
        self.set_current_index(self.current_index);
    }

    pub fn set_loading(&mut self, is_loading: bool) {
        self.is_loading = is_loading;
    }

    pub fn clear(&mut self) {
        self.audios.clear();
        self.current_index = None;
    }

    pub fn current(&self) -> Option<&AudioRecord> {
        self.current_index.and_then(|index| self.audios.get(index))
    }

    pub fn index_of(&self, id: &str) -> Option<usize> {
        self.audios.iter().position(|record| record.id == id)
    }

    pub fn find(&self, id: &str) -> Option<&AudioRecord> {
        self.audios.iter().find(|record| record.id == id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.audios.iter().map(|record| record.id.clone()).collect()
    }
}
