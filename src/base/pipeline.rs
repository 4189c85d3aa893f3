/// Fixed-depth staged pipeline.  One item per stage; `advance` moves every item one stage down
/// and hands back whatever falls off the end.
#[derive(Debug)]
pub struct Pipeline<T> {
    name: &'static str,
    stages: Vec<Option<T>>,
}

impl<T> Pipeline<T> {
    pub fn new(name: &'static str, depth: usize) -> Self {
        assert!(depth > 0, "pipeline depth must be > 0");
        let mut stages = Vec::with_capacity(depth);
        stages.resize_with(depth, || None);
        Self { name, stages }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn can_append(&self) -> bool {
        self.stages[0].is_none()
    }

    /// Put an item into the first stage.  Hands the item back if the stage is occupied.
    pub fn append(&mut self, item: T) -> Result<(), T> {
        if !self.can_append() {
            return Err(item);
        }
        self.stages[0] = Some(item);
        Ok(())
    }

    pub fn stage(&self, idx: usize) -> Option<&T> {
        self.stages.get(idx).and_then(Option::as_ref)
    }

    pub fn num_valid(&self) -> usize {
        self.stages.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.num_valid() == 0
    }

    pub fn advance(&mut self) -> Option<T> {
        let retired = self.stages.pop().flatten();
        self.stages.insert(0, None);
        retired
    }
}

#[cfg(test)]
mod tests {
    use super::Pipeline;

    #[test]
    fn item_walks_every_stage() {
        let mut pipe = Pipeline::new("p", 3);
        pipe.append(1).unwrap();
        assert_eq!(Some(&1), pipe.stage(0));
        assert!(pipe.advance().is_none());
        assert_eq!(Some(&1), pipe.stage(1));
        assert!(pipe.advance().is_none());
        assert_eq!(Some(&1), pipe.stage(2));
        assert_eq!(Some(1), pipe.advance());
        assert!(pipe.is_empty());
    }

    #[test]
    fn append_rejects_busy_first_stage() {
        let mut pipe = Pipeline::new("p", 3);
        pipe.append(1).unwrap();
        assert_eq!(Err(2), pipe.append(2));
        pipe.advance();
        pipe.append(2).unwrap();
        assert_eq!(2, pipe.num_valid());
    }
}
