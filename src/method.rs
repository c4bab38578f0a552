#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Idempotency {
    Idempotent,
    NonIdempotent,
}

impl Idempotency {
    pub const fn is_replay_safe(self) -> bool {
        matches!(self, Self::Idempotent)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idempotent => "idempotent",
            Self::NonIdempotent => "non_idempotent",
        }
    }
}

impl std::fmt::Display for Idempotency {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RpcMethod {
    Get,
    Set,
    Delete,
    Increment,
    SetIfNotExists,
    KeysExist,
    UpdateTtl,
    ItemGetTtl,
    DictionaryGet,
    DictionaryFetch,
    DictionarySet,
    DictionaryIncrement,
    DictionaryDelete,
    SetFetch,
    SetUnion,
    SetDifference,
    SetContains,
    ListFetch,
    ListLength,
    ListRemove,
    ListPushFront,
    ListPushBack,
    ListPopFront,
    ListPopBack,
    ListConcatenateFront,
    ListConcatenateBack,
    SortedSetPut,
    SortedSetFetch,
    SortedSetRemove,
    SortedSetIncrement,
    TopicPublish,
    TopicSubscribe,
}

impl RpcMethod {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Delete => "delete",
            Self::Increment => "increment",
            Self::SetIfNotExists => "set_if_not_exists",
            Self::KeysExist => "keys_exist",
            Self::UpdateTtl => "update_ttl",
            Self::ItemGetTtl => "item_get_ttl",
            Self::DictionaryGet => "dictionary_get",
            Self::DictionaryFetch => "dictionary_fetch",
            Self::DictionarySet => "dictionary_set",
            Self::DictionaryIncrement => "dictionary_increment",
            Self::DictionaryDelete => "dictionary_delete",
            Self::SetFetch => "set_fetch",
            Self::SetUnion => "set_union",
            Self::SetDifference => "set_difference",
            Self::SetContains => "set_contains",
            Self::ListFetch => "list_fetch",
            Self::ListLength => "list_length",
            Self::ListRemove => "list_remove",
            Self::ListPushFront => "list_push_front",
            Self::ListPushBack => "list_push_back",
            Self::ListPopFront => "list_pop_front",
            Self::ListPopBack => "list_pop_back",
            Self::ListConcatenateFront => "list_concatenate_front",
            Self::ListConcatenateBack => "list_concatenate_back",
            Self::SortedSetPut => "sorted_set_put",
            Self::SortedSetFetch => "sorted_set_fetch",
            Self::SortedSetRemove => "sorted_set_remove",
            Self::SortedSetIncrement => "sorted_set_increment",
            Self::TopicPublish => "topic_publish",
            Self::TopicSubscribe => "topic_subscribe",
        }
    }

    pub const fn idempotency(self) -> Idempotency {
        match self {
            Self::Get
            | Self::Set
            | Self::Delete
            | Self::DictionarySet
            | Self::DictionaryGet
            | Self::DictionaryFetch
            | Self::DictionaryDelete
            | Self::SetUnion
            | Self::SetDifference
            | Self::SetFetch
            | Self::ListFetch
            | Self::ListLength
            // ListRemove deletes every occurrence of a value, so a replay
            // converges to the same list.
            | Self::ListRemove => Idempotency::Idempotent,
            _ => Idempotency::NonIdempotent,
        }
    }
}

impl std::fmt::Display for RpcMethod {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{Idempotency, RpcMethod};

    #[test]
    fn reads_and_unconditional_writes_are_replay_safe() {
        for method in [
            RpcMethod::Get,
            RpcMethod::Set,
            RpcMethod::Delete,
            RpcMethod::DictionaryFetch,
            RpcMethod::SetUnion,
            RpcMethod::ListFetch,
            RpcMethod::ListRemove,
            RpcMethod::ListLength,
        ] {
            assert_eq!(method.idempotency(), Idempotency::Idempotent, "{method}");
        }
    }

    #[test]
    fn counters_and_conditional_writes_are_not_replay_safe() {
        for method in [
            RpcMethod::Increment,
            RpcMethod::SetIfNotExists,
            RpcMethod::UpdateTtl,
            RpcMethod::DictionaryIncrement,
            RpcMethod::ListPushFront,
            RpcMethod::ListPopBack,
            RpcMethod::ListConcatenateBack,
            RpcMethod::SortedSetIncrement,
            RpcMethod::TopicPublish,
        ] {
            assert_eq!(method.idempotency(), Idempotency::NonIdempotent, "{method}");
        }
    }
}
